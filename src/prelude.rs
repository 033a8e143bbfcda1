//! # classweave Prelude
//!
//! The types needed to configure and run an instrumentation pass. Import this module to get
//! quick access to hook policies, the rewriters and the dispatcher.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all classweave operations
pub use crate::Error;

/// The result type used throughout classweave
pub use crate::Result;

/// Parsed class file
pub use crate::ClassFile;

// ================================================================================================
// Hooks and Rewriting
// ================================================================================================

/// Hook policies and their composition
pub use crate::weave::{CallbackHook, HookChain, HookEmitter, HookEvent, HookPolicy, HookSite};

/// Method and class rewriters
pub use crate::weave::{
    CodeUnitRewriter, DefaultSelector, MethodCandidate, MethodRewriter, MethodSelector,
    MethodTarget, UnitOutcome,
};

/// Editable method bodies
pub use crate::method::MethodBody;

// ================================================================================================
// Dispatch
// ================================================================================================

/// Change-set policy
pub use crate::dispatch::{Action, BuildMode, ChangeSetResolver, ChangeStatus};

/// Inputs and destinations
pub use crate::dispatch::{
    ArchiveInput, ContentTags, DestinationResolver, DirectoryInput, Format, InputSource,
    OutputLayout,
};

/// Running a build
pub use crate::dispatch::{CopyPolicy, DispatchConfig, Dispatcher, RunReport};
