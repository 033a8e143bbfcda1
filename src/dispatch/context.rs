//! Per-run state shared by the dispatcher's workers.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use dashmap::DashSet;

use crate::{dispatch::changeset::BuildMode, weave::UnitOutcome, Error, Result};

/// State of one dispatcher run.
///
/// Created when a run starts and dropped when it ends; nothing outlives the run. All
/// fields are safe to update from rayon workers.
#[derive(Debug)]
pub struct RunContext {
    /// Build mode of the run
    pub mode: BuildMode,
    claimed: DashSet<PathBuf>,
    units_rewritten: AtomicUsize,
    units_unchanged: AtomicUsize,
    resources_copied: AtomicUsize,
    inputs_copied: AtomicUsize,
    inputs_skipped: AtomicUsize,
    outputs_deleted: AtomicUsize,
    methods: AtomicUsize,
    return_sites: AtomicUsize,
    started: Instant,
}

impl RunContext {
    /// Starts a run.
    #[must_use]
    pub fn new(mode: BuildMode) -> Self {
        RunContext {
            mode,
            claimed: DashSet::new(),
            units_rewritten: AtomicUsize::new(0),
            units_unchanged: AtomicUsize::new(0),
            resources_copied: AtomicUsize::new(0),
            inputs_copied: AtomicUsize::new(0),
            inputs_skipped: AtomicUsize::new(0),
            outputs_deleted: AtomicUsize::new(0),
            methods: AtomicUsize::new(0),
            return_sites: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    /// Claims a destination path for this run.
    ///
    /// # Errors
    /// Returns [`crate::Error::DestinationConflict`] if the path was already claimed.
    pub fn claim(&self, path: &Path) -> Result<()> {
        if self.claimed.insert(path.to_path_buf()) {
            Ok(())
        } else {
            Err(Error::DestinationConflict(path.to_path_buf()))
        }
    }

    /// Number of destinations claimed so far.
    #[must_use]
    pub fn claimed(&self) -> usize {
        self.claimed.len()
    }

    /// Records the outcome of one class.
    pub fn record_unit(&self, outcome: &UnitOutcome) {
        match outcome {
            UnitOutcome::Rewritten {
                methods,
                return_sites,
                ..
            } => {
                self.units_rewritten.fetch_add(1, Ordering::Relaxed);
                self.methods.fetch_add(*methods, Ordering::Relaxed);
                self.return_sites.fetch_add(*return_sites, Ordering::Relaxed);
            }
            UnitOutcome::Unchanged => {
                self.units_unchanged.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Records a non-class file copied as part of a rewrite.
    pub fn record_resource(&self) {
        self.resources_copied.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an unchanged input or file that was copied.
    pub fn record_copy(&self) {
        self.inputs_copied.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an unchanged input or file whose previous output was kept.
    pub fn record_skip(&self) {
        self.inputs_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a removed output.
    pub fn record_delete(&self) {
        self.outputs_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn report(&self) -> RunReport {
        RunReport {
            mode: self.mode,
            units_rewritten: self.units_rewritten.load(Ordering::Relaxed),
            units_unchanged: self.units_unchanged.load(Ordering::Relaxed),
            resources_copied: self.resources_copied.load(Ordering::Relaxed),
            inputs_copied: self.inputs_copied.load(Ordering::Relaxed),
            inputs_skipped: self.inputs_skipped.load(Ordering::Relaxed),
            outputs_deleted: self.outputs_deleted.load(Ordering::Relaxed),
            methods_instrumented: self.methods.load(Ordering::Relaxed),
            return_sites_instrumented: self.return_sites.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

/// Counters of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Build mode of the run
    pub mode: BuildMode,
    /// Classes with at least one instrumented method
    pub units_rewritten: usize,
    /// Classes written with their original bytes (nothing eligible)
    pub units_unchanged: usize,
    /// Non-class files copied while rewriting an input
    pub resources_copied: usize,
    /// Unchanged archives and files copied to their destination
    pub inputs_copied: usize,
    /// Unchanged archives and files whose previous output was kept
    pub inputs_skipped: usize,
    /// Outputs removed because their input was removed
    pub outputs_deleted: usize,
    /// Methods that received hooks
    pub methods_instrumented: usize,
    /// Return instructions that received the return hook
    pub return_sites_instrumented: usize,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} run: {} classes rewritten ({} methods, {} return sites), {} unchanged, \
             {} resources, {} copied, {} kept, {} deleted in {:.2?}",
            self.mode,
            self.units_rewritten,
            self.methods_instrumented,
            self.return_sites_instrumented,
            self.units_unchanged,
            self.resources_copied,
            self.inputs_copied,
            self.inputs_skipped,
            self.outputs_deleted,
            self.elapsed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn destination_claimed_once() {
        let context = RunContext::new(BuildMode::Full);
        context.claim(Path::new("/out/a.jar")).unwrap();
        context.claim(Path::new("/out/b.jar")).unwrap();
        assert!(matches!(
            context.claim(Path::new("/out/a.jar")),
            Err(Error::DestinationConflict(_))
        ));
        assert_eq!(context.claimed(), 2);
    }

    #[test]
    fn concurrent_claims_are_exclusive() {
        let context = RunContext::new(BuildMode::Incremental);
        let won: usize = (0..64)
            .into_par_iter()
            .map(|i| context.claim(Path::new(&format!("/out/{}", i % 8))).is_ok() as usize)
            .sum();
        assert_eq!(won, 8);
    }

    #[test]
    fn counters() {
        let context = RunContext::new(BuildMode::Incremental);
        context.record_unit(&UnitOutcome::Rewritten {
            bytes: Vec::new(),
            methods: 3,
            return_sites: 4,
        });
        context.record_unit(&UnitOutcome::Unchanged);
        context.record_copy();
        context.record_delete();

        let report = context.report();
        assert_eq!(report.units_rewritten, 1);
        assert_eq!(report.units_unchanged, 1);
        assert_eq!(report.methods_instrumented, 3);
        assert_eq!(report.return_sites_instrumented, 4);
        assert_eq!(report.inputs_copied, 1);
        assert_eq!(report.outputs_deleted, 1);
        assert!(report.to_string().starts_with("Incremental run: 1 classes rewritten"));
    }
}
