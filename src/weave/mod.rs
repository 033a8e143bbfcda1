//! Hook weaving.
//!
//! # Architecture
//!
//! ```text
//! CodeUnitRewriter ── per selected method ──> MethodRewriter ── per injection point ──> HookChain
//!        │                                           │                                    │
//!   ClassFile::parse                        MethodBody (labels)                 HookPolicy + HookEmitter
//! ```
//!
//! # Key Components
//!
//! - [`crate::weave::HookPolicy`] / [`crate::weave::HookChain`] - What runs at each injection point
//! - [`crate::weave::HookEmitter`] - Stack-checked emission API handed to policies
//! - [`crate::weave::CallbackHook`] - Reference policy calling a runtime class
//! - [`crate::weave::MethodRewriter`] - Entry, return and catch-all error weaving for one body
//! - [`crate::weave::CodeUnitRewriter`] - All selected methods of one class
//! - [`crate::weave::MethodSelector`] / [`crate::weave::DefaultSelector`] - Eligibility

mod callback;
mod class;
mod emitter;
mod hooks;
mod method;

pub use callback::CallbackHook;
pub use class::{CodeUnitRewriter, DefaultSelector, MethodCandidate, MethodSelector, UnitOutcome};
pub use emitter::HookEmitter;
pub use hooks::{EmittedHook, HookChain, HookEvent, HookPolicy, HookSite};
pub use method::{MethodRewriter, MethodTarget, RewrittenMethod};
