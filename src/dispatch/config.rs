//! Configuration for the dispatcher.

use strum::{Display, EnumIter};

/// How [`crate::dispatch::Action::CopyThrough`] treats the destination of an unchanged input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum CopyPolicy {
    /// Always copy the input over the destination
    Always,
    /// Copy only if the destination does not exist (it may have been cleared by an
    /// unrelated full build)
    #[default]
    IfMissing,
    /// Trust the previous output and touch nothing
    Never,
}

/// Configuration for a [`crate::dispatch::Dispatcher`].
///
/// # Usage Examples
///
/// ```rust
/// use classweave::dispatch::{CopyPolicy, DispatchConfig};
///
/// let config = DispatchConfig::sequential().with_copy_policy(CopyPolicy::Always);
/// assert!(!config.parallel);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Rewrite the units of one input on the rayon pool (default: true).
    pub parallel: bool,

    /// Treatment of unchanged inputs (default: [`CopyPolicy::IfMissing`]).
    pub copy_unchanged: CopyPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            parallel: true,
            copy_unchanged: CopyPolicy::IfMissing,
        }
    }
}

impl DispatchConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-threaded preset, useful for deterministic logs and debugging.
    #[must_use]
    pub fn sequential() -> Self {
        DispatchConfig {
            parallel: false,
            ..Self::default()
        }
    }

    /// Sets whether units are rewritten in parallel.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the treatment of unchanged inputs.
    #[must_use]
    pub fn with_copy_policy(mut self, policy: CopyPolicy) -> Self {
        self.copy_unchanged = policy;
        self
    }
}
