//! Incremental change-set policy.

use strum::{Display, EnumIter};

/// Change status of one input, as reported by the build system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ChangeStatus {
    /// Same content as in the previous build
    Unchanged,
    /// New, or different from the previous build
    AddedOrChanged,
    /// Present in the previous build, gone now
    Removed,
}

/// Kind of the running build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum BuildMode {
    /// Everything is rebuilt; the output area starts empty
    Full,
    /// Only what changed since the previous build is reprocessed
    Incremental,
}

impl BuildMode {
    /// Maps the host's "is this an incremental build" flag.
    #[must_use]
    pub fn from_incremental(incremental: bool) -> Self {
        if incremental {
            BuildMode::Incremental
        } else {
            BuildMode::Full
        }
    }

    /// Returns `true` for [`BuildMode::Incremental`].
    #[must_use]
    pub fn is_incremental(self) -> bool {
        self == BuildMode::Incremental
    }
}

/// What to do with the output of one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Action {
    /// Instrument the input and write the result
    Rewrite,
    /// Keep the previous output (see [`crate::dispatch::CopyPolicy`])
    CopyThrough,
    /// Remove the previous output
    Delete,
}

/// Maps change status and build mode to an [`Action`].
///
/// | mode        | status         | action      |
/// |-------------|----------------|-------------|
/// | Full        | any            | Rewrite     |
/// | Incremental | Unchanged      | CopyThrough |
/// | Incremental | AddedOrChanged | Rewrite     |
/// | Incremental | Removed        | Delete      |
///
/// # Usage Examples
///
/// ```rust
/// use classweave::dispatch::{Action, BuildMode, ChangeSetResolver, ChangeStatus};
///
/// assert_eq!(
///     ChangeSetResolver::resolve(ChangeStatus::Removed, BuildMode::Incremental),
///     Action::Delete
/// );
/// assert_eq!(
///     ChangeSetResolver::resolve(ChangeStatus::Removed, BuildMode::Full),
///     Action::Rewrite
/// );
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeSetResolver;

impl ChangeSetResolver {
    /// Resolves the action for one input.
    #[must_use]
    pub const fn resolve(status: ChangeStatus, mode: BuildMode) -> Action {
        match (mode, status) {
            (BuildMode::Full, _) | (BuildMode::Incremental, ChangeStatus::AddedOrChanged) => {
                Action::Rewrite
            }
            (BuildMode::Incremental, ChangeStatus::Unchanged) => Action::CopyThrough,
            (BuildMode::Incremental, ChangeStatus::Removed) => Action::Delete,
        }
    }
}
