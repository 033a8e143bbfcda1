//! Shared functionality for unit tests: a class file builder and a small interpreter that
//! runs woven methods and records the hooks they fire.

pub(crate) mod builders;
pub(crate) mod emulator;

pub use builders::{ClassBuilder, TestCode};
pub use emulator::{Emulator, Outcome, Value};
