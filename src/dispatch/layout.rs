//! Reference [`crate::dispatch::DestinationResolver`] that lays outputs out under one root.

use std::{
    fmt::Write as _,
    io,
    path::{Path, PathBuf},
};

use sha1::{Digest, Sha1};

use crate::{
    dispatch::input::{ContentTags, DestinationResolver, Format},
    Error, Result,
};

/// Places every output under one root directory.
///
/// ```text
/// <root>/archives/<name>-<hash>.jar
/// <root>/directories/<name>-<hash>/
/// ```
///
/// `<name>` is the last path component of the identity (without a `.jar` suffix) and
/// `<hash>` the first 8 hex digits of the SHA-1 of the full identity, so two inputs with the
/// same file name in different places never share an output.
///
/// # Usage Examples
///
/// ```rust
/// use classweave::dispatch::{ContentTags, DestinationResolver, Format, OutputLayout};
///
/// let layout = OutputLayout::new("/build/instrumented");
/// let path = layout.resolve("/libs/okio.jar", &ContentTags::default(), Format::Archive)?;
/// assert!(path.starts_with("/build/instrumented/archives"));
/// assert!(path.file_name().unwrap().to_str().unwrap().starts_with("okio-"));
/// # Ok::<(), classweave::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Creates a layout under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        OutputLayout { root: root.into() }
    }

    /// The output root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn short_hash(identity: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(identity.as_bytes());
        let digest = hasher.finalize();

        let mut hex = String::with_capacity(8);
        for byte in &digest[..4] {
            let _ = write!(hex, "{:02x}", byte);
        }
        hex
    }

    fn display_name(identity: &str) -> String {
        let last = identity
            .rsplit(['/', '\\'])
            .find(|part| !part.is_empty())
            .unwrap_or(identity);
        let stem = last.strip_suffix(".jar").unwrap_or(last);

        stem.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl DestinationResolver for OutputLayout {
    fn resolve(&self, identity: &str, _tags: &ContentTags, format: Format) -> Result<PathBuf> {
        if identity.trim().is_empty() {
            return Err(Error::InvalidDestination(
                "empty input identity".to_string(),
            ));
        }

        let name = format!(
            "{}-{}",
            Self::display_name(identity),
            Self::short_hash(identity)
        );
        Ok(match format {
            Format::Archive => self.root.join("archives").join(format!("{}.jar", name)),
            Format::Directory => self.root.join("directories").join(name),
        })
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => Ok(other?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_file_name_different_identity() {
        let layout = OutputLayout::new("/out");
        let tags = ContentTags::default();
        let a = layout.resolve("/a/lib.jar", &tags, Format::Archive).unwrap();
        let b = layout.resolve("/b/lib.jar", &tags, Format::Archive).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.extension().unwrap(), "jar");

        // Deterministic
        assert_eq!(a, layout.resolve("/a/lib.jar", &tags, Format::Archive).unwrap());
    }

    #[test]
    fn directory_layout() {
        let layout = OutputLayout::new("/out");
        let path = layout
            .resolve("/proj/build/classes/", &ContentTags::default(), Format::Directory)
            .unwrap();
        assert!(path.starts_with("/out/directories"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("classes-"));
        assert_eq!(name.len(), "classes-".len() + 8);
    }

    #[test]
    fn empty_identity_rejected() {
        let layout = OutputLayout::new("/out");
        assert!(matches!(
            layout.resolve("  ", &ContentTags::default(), Format::Archive),
            Err(Error::InvalidDestination(_))
        ));
    }

    #[test]
    fn clear_missing_root_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path().join("never-created"));
        layout.clear().unwrap();

        std::fs::create_dir_all(dir.path().join("out/archives")).unwrap();
        let layout = OutputLayout::new(dir.path().join("out"));
        layout.clear().unwrap();
        assert!(!dir.path().join("out").exists());
    }
}
