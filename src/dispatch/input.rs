//! Input descriptors and destination resolution.

use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

use strum::Display;

use crate::{dispatch::changeset::ChangeStatus, Error, Result};

/// Container format of an input and its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Format {
    /// A jar (zip) archive
    Archive,
    /// A directory of loose class files and resources
    Directory,
}

/// Content-type and scope tags of an input.
///
/// Opaque to the dispatcher; they are only passed on to the [`DestinationResolver`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ContentTags {
    /// Content types, e.g. `classes` or `resources`
    pub content_types: Vec<String>,
    /// Scopes, e.g. `project` or `external-libraries`
    pub scopes: Vec<String>,
}

impl ContentTags {
    /// Creates tags from content types and scopes.
    #[must_use]
    pub fn new<S: Into<String>>(
        content_types: impl IntoIterator<Item = S>,
        scopes: impl IntoIterator<Item = S>,
    ) -> Self {
        ContentTags {
            content_types: content_types.into_iter().map(Into::into).collect(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }
}

/// A jar input; the whole archive shares one change status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInput {
    /// Stable identity used for destination resolution
    pub name: String,
    /// Location of the archive
    pub path: PathBuf,
    /// Change status of the archive
    pub status: ChangeStatus,
    /// Content tags
    pub tags: ContentTags,
}

impl ArchiveInput {
    /// Creates an archive input named after its path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, status: ChangeStatus) -> Self {
        let path = path.into();
        ArchiveInput {
            name: path.to_string_lossy().into_owned(),
            path,
            status,
            tags: ContentTags::default(),
        }
    }
}

/// A directory input with a per-file change map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryInput {
    /// Stable identity used for destination resolution
    pub name: String,
    /// Source root
    pub root: PathBuf,
    /// Files changed since the previous build, absolute or relative to [`Self::root`].
    /// Only consulted for incremental builds.
    pub changed_files: BTreeMap<PathBuf, ChangeStatus>,
    /// Content tags
    pub tags: ContentTags,
}

impl DirectoryInput {
    /// Creates a directory input named after its root, with an empty change map.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        DirectoryInput {
            name: root.to_string_lossy().into_owned(),
            root,
            changed_files: BTreeMap::new(),
            tags: ContentTags::default(),
        }
    }

    /// Adds an entry to the change map.
    #[must_use]
    pub fn with_change(mut self, file: impl Into<PathBuf>, status: ChangeStatus) -> Self {
        self.changed_files.insert(file.into(), status);
        self
    }
}

/// One input of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// A jar
    Archive(ArchiveInput),
    /// A directory
    Directory(DirectoryInput),
}

impl InputSource {
    /// Identity of the input.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            InputSource::Archive(archive) => &archive.name,
            InputSource::Directory(directory) => &directory.name,
        }
    }

    /// Content tags of the input.
    #[must_use]
    pub fn tags(&self) -> &ContentTags {
        match self {
            InputSource::Archive(archive) => &archive.tags,
            InputSource::Directory(directory) => &directory.tags,
        }
    }

    /// Container format of the input.
    #[must_use]
    pub fn format(&self) -> Format {
        match self {
            InputSource::Archive(_) => Format::Archive,
            InputSource::Directory(_) => Format::Directory,
        }
    }
}

impl From<ArchiveInput> for InputSource {
    fn from(input: ArchiveInput) -> Self {
        InputSource::Archive(input)
    }
}

impl From<DirectoryInput> for InputSource {
    fn from(input: DirectoryInput) -> Self {
        InputSource::Directory(input)
    }
}

/// Maps inputs to output locations.
///
/// Implemented by the host build system. Distinct identities must resolve to distinct,
/// non-nested locations; the dispatcher rejects a location claimed twice in one run.
pub trait DestinationResolver: Send + Sync {
    /// Output location for an input: a file path for [`Format::Archive`], a directory for
    /// [`Format::Directory`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidDestination`] if no location can be produced.
    fn resolve(&self, identity: &str, tags: &ContentTags, format: Format) -> Result<PathBuf>;

    /// Removes every output. A missing output area is not an error.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the output area cannot be removed.
    fn clear(&self) -> Result<()>;
}

/// Maps a file of a directory input to its path under the destination root.
///
/// `file` may be absolute (it must then lie under `source_root`) or relative to
/// `source_root`.
///
/// # Errors
/// Returns [`crate::Error::InvalidDestination`] if `file` is outside `source_root` or
/// escapes it through `..`.
pub fn mirror_path(source_root: &Path, destination_root: &Path, file: &Path) -> Result<PathBuf> {
    let relative = if file.is_absolute() || file.starts_with(source_root) {
        file.strip_prefix(source_root).map_err(|_| {
            Error::InvalidDestination(format!(
                "{} is outside of its source root {}",
                file.display(),
                source_root.display()
            ))
        })?
    } else {
        file
    };

    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes || relative.as_os_str().is_empty() {
        return Err(Error::InvalidDestination(format!(
            "{} does not name a file under {}",
            file.display(),
            source_root.display()
        )));
    }

    Ok(destination_root.join(relative))
}
