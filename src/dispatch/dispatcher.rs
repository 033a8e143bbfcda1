//! The incremental dispatcher.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use rayon::prelude::*;

use crate::{
    dispatch::{
        archive::rewrite_archive,
        changeset::{Action, BuildMode, ChangeSetResolver, ChangeStatus},
        config::{CopyPolicy, DispatchConfig},
        context::{RunContext, RunReport},
        create_parent,
        input::{mirror_path, ArchiveInput, DestinationResolver, DirectoryInput, InputSource},
        remove_if_present,
    },
    weave::{CodeUnitRewriter, DefaultSelector, HookChain, MethodSelector, UnitOutcome},
    Error, Result,
};

/// Drives one instrumentation run over a set of inputs.
///
/// For every input the dispatcher resolves a destination, asks [`ChangeSetResolver`] what
/// to do and then rewrites, copies or deletes. The first failure aborts the run; outputs
/// written before it are left in place and should be treated as stale.
///
/// # Usage Examples
///
/// ```rust,no_run
/// use classweave::dispatch::{
///     ArchiveInput, BuildMode, ChangeStatus, Dispatcher, DirectoryInput, InputSource,
///     OutputLayout,
/// };
/// use classweave::weave::{CallbackHook, HookChain};
///
/// let chain = HookChain::new().with(CallbackHook::new("com/example/Trace"))?;
/// let dispatcher = Dispatcher::new(OutputLayout::new("build/instrumented"), chain);
///
/// let inputs: Vec<InputSource> = vec![
///     ArchiveInput::new("libs/okio.jar", ChangeStatus::Unchanged).into(),
///     DirectoryInput::new("build/classes")
///         .with_change("com/example/App.class", ChangeStatus::AddedOrChanged)
///         .into(),
/// ];
///
/// let report = dispatcher.run(&inputs, BuildMode::Incremental)?;
/// println!("{}", report);
/// # Ok::<(), classweave::Error>(())
/// ```
pub struct Dispatcher {
    resolver: Arc<dyn DestinationResolver>,
    chain: HookChain,
    selector: Arc<dyn MethodSelector>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Creates a dispatcher with the [`DefaultSelector`] and the default configuration.
    #[must_use]
    pub fn new(resolver: impl DestinationResolver + 'static, chain: HookChain) -> Self {
        Dispatcher {
            resolver: Arc::new(resolver),
            chain,
            selector: Arc::new(DefaultSelector),
            config: DispatchConfig::default(),
        }
    }

    /// Replaces the method selector.
    #[must_use]
    pub fn with_selector(mut self, selector: impl MethodSelector + 'static) -> Self {
        self.selector = Arc::new(selector);
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Processes every input.
    ///
    /// A full build clears the output area first.
    ///
    /// # Errors
    /// Returns the first error of any input: I/O failures, unresolvable or conflicting
    /// destinations, malformed classes (as [`crate::Error::Unit`]) and hook policy failures.
    pub fn run(&self, inputs: &[InputSource], mode: BuildMode) -> Result<RunReport> {
        log::info!(
            "Starting {} run over {} inputs with {} hook policies",
            mode,
            inputs.len(),
            self.chain.len()
        );

        let context = RunContext::new(mode);
        if !mode.is_incremental() {
            self.resolver.clear()?;
        }

        for input in inputs {
            let destination = self
                .resolver
                .resolve(input.name(), input.tags(), input.format())?;
            context.claim(&destination)?;

            match input {
                InputSource::Archive(archive) => {
                    self.process_archive(archive, &destination, &context)?;
                }
                InputSource::Directory(directory) => {
                    self.process_directory(directory, &destination, &context)?;
                }
            }
        }

        let report = context.report();
        log::info!("{}", report);
        Ok(report)
    }

    fn unit_rewriter(&self) -> CodeUnitRewriter<'_> {
        CodeUnitRewriter::new(&self.chain, &*self.selector)
    }

    fn process_archive(
        &self,
        input: &ArchiveInput,
        destination: &Path,
        context: &RunContext,
    ) -> Result<()> {
        let action = ChangeSetResolver::resolve(input.status, context.mode);
        log::debug!(
            "{} ({}) -> {} [{}]",
            input.path.display(),
            input.status,
            destination.display(),
            action
        );

        match action {
            Action::Rewrite => rewrite_archive(
                &input.path,
                destination,
                &self.unit_rewriter(),
                context,
                self.config.parallel,
            ),
            Action::CopyThrough => self.copy_through(&input.path, destination, context),
            Action::Delete => {
                if remove_if_present(destination)? {
                    context.record_delete();
                }
                Ok(())
            }
        }
    }

    fn process_directory(
        &self,
        input: &DirectoryInput,
        destination: &Path,
        context: &RunContext,
    ) -> Result<()> {
        let work: Vec<(PathBuf, Action)> = if context.mode.is_incremental() {
            input
                .changed_files
                .iter()
                .map(|(file, status)| {
                    let file = if file.is_absolute() {
                        file.clone()
                    } else {
                        input.root.join(file)
                    };
                    (file, ChangeSetResolver::resolve(*status, context.mode))
                })
                .collect()
        } else {
            let action = ChangeSetResolver::resolve(ChangeStatus::AddedOrChanged, context.mode);
            list_files(&input.root)?
                .into_iter()
                .map(|file| (file, action))
                .collect()
        };

        log::debug!(
            "{} -> {} [{} files]",
            input.root.display(),
            destination.display(),
            work.len()
        );

        let mut planned = Vec::with_capacity(work.len());
        for (file, action) in work {
            let target = mirror_path(&input.root, destination, &file)?;
            context.claim(&target)?;
            planned.push((file, target, action));
        }

        let rewriter = self.unit_rewriter();
        let process = |(file, target, action): &(PathBuf, PathBuf, Action)| -> Result<()> {
            match action {
                Action::Rewrite => rewrite_file(file, target, &rewriter, context),
                Action::CopyThrough => self.copy_through(file, target, context),
                Action::Delete => {
                    if remove_if_present(target)? {
                        context.record_delete();
                    }
                    Ok(())
                }
            }
        };

        if self.config.parallel {
            planned.par_iter().try_for_each(process)
        } else {
            planned.iter().try_for_each(process)
        }
    }

    fn copy_through(&self, source: &Path, destination: &Path, context: &RunContext) -> Result<()> {
        let copy = match self.config.copy_unchanged {
            CopyPolicy::Always => true,
            CopyPolicy::IfMissing => !destination.exists(),
            CopyPolicy::Never => false,
        };

        if !copy {
            context.record_skip();
            return Ok(());
        }

        create_parent(destination)?;
        fs::copy(source, destination)
            .map_err(|e| Error::from(e).in_unit(source.display().to_string()))?;
        context.record_copy();
        Ok(())
    }
}

/// Rewrites one loose file: classes are instrumented, anything else is copied.
fn rewrite_file(
    source: &Path,
    destination: &Path,
    rewriter: &CodeUnitRewriter<'_>,
    context: &RunContext,
) -> Result<()> {
    let unit = || source.display().to_string();
    let bytes = fs::read(source).map_err(|e| Error::from(e).in_unit(unit()))?;
    create_parent(destination)?;

    let is_class = source
        .extension()
        .is_some_and(|extension| extension == "class");
    if !is_class {
        fs::write(destination, &bytes).map_err(|e| Error::from(e).in_unit(unit()))?;
        context.record_resource();
        return Ok(());
    }

    let outcome = rewriter.rewrite(&bytes).map_err(|e| e.in_unit(unit()))?;
    context.record_unit(&outcome);

    let written = match outcome {
        UnitOutcome::Rewritten { bytes, .. } => fs::write(destination, bytes),
        UnitOutcome::Unchanged => fs::write(destination, &bytes),
    };
    written.map_err(|e| Error::from(e).in_unit(unit()))
}

/// Every regular file below `root`, sorted.
///
/// Symbolic links are followed; a directory reached twice through links is walked once.
fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut visited = HashSet::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(directory) = pending.pop() {
        if !visited.insert(fs::canonicalize(&directory)?) {
            continue;
        }

        for entry in fs::read_dir(&directory)? {
            let entry = entry?;
            let path = entry.path();
            let mut file_type = entry.file_type()?;
            if file_type.is_symlink() {
                file_type = fs::metadata(&path)
                    .map_err(|e| Error::from(e).in_unit(path.display().to_string()))?
                    .file_type();
            }

            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
