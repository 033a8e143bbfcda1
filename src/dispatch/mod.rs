//! Incremental dispatch of build inputs.
//!
//! The host build system describes its inputs (jars and class directories, each with a
//! change status) and supplies a [`crate::dispatch::DestinationResolver`]. The
//! [`crate::dispatch::Dispatcher`] decides per input, and per changed file for directories,
//! whether to rewrite, copy through or delete, and drives the
//! [`crate::weave::CodeUnitRewriter`] over every class it rewrites.
//!
//! # Key Components
//!
//! - [`crate::dispatch::ChangeSetResolver`] - Status and build mode to action table
//! - [`crate::dispatch::Dispatcher`] - Runs one build over all inputs
//! - [`crate::dispatch::RunContext`] / [`crate::dispatch::RunReport`] - Per-run state and counters
//! - [`crate::dispatch::OutputLayout`] - Reference destination resolver
//! - [`crate::dispatch::DispatchConfig`] - Parallelism and copy-through policy

mod archive;
mod changeset;
mod config;
mod context;
mod dispatcher;
mod input;
mod layout;

pub use changeset::{Action, BuildMode, ChangeSetResolver, ChangeStatus};
pub use config::{CopyPolicy, DispatchConfig};
pub use context::{RunContext, RunReport};
pub use dispatcher::Dispatcher;
pub use input::{
    mirror_path, ArchiveInput, ContentTags, DestinationResolver, DirectoryInput, Format,
    InputSource,
};
pub use layout::OutputLayout;

use std::{fs, io, path::Path};

use crate::Result;

/// Creates the parent directory of `path` if needed.
pub(crate) fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Removes a file or directory; returns `false` if there was nothing to remove.
pub(crate) fn remove_if_present(path: &Path) -> Result<bool> {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match removed {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
