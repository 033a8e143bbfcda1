//! Editable method bodies.
//!
//! A [`crate::method::MethodBody`] is built from a `Code` attribute, edited as a list of
//! [`crate::method::Node`]s and encoded back with freshly computed offsets. Handler regions,
//! stack map frames and debug tables all refer to labels, so inserting code never leaves a
//! stale offset behind.

mod body;
mod handlers;

pub use body::{LineNumber, LocalVariable, MethodBody, Node};
pub use handlers::{partial_overlaps, HandlerRegion};
