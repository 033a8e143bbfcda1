//! Jar re-packing.
//!
//! A rewritten jar keeps the entry order and the storage method (stored or deflated) of the
//! input. Class entries are instrumented, everything else is copied byte for byte. Entry
//! timestamps are normalised so identical input produces identical output.

use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

use rayon::prelude::*;
use zip::{write::SimpleFileOptions, CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::{
    dispatch::{context::RunContext, create_parent},
    weave::{CodeUnitRewriter, UnitOutcome},
    Error, Result,
};

/// One entry of the source jar, fully read.
struct ArchiveEntry {
    name: String,
    data: Vec<u8>,
    stored: bool,
    directory: bool,
}

impl ArchiveEntry {
    fn is_class(&self) -> bool {
        !self.directory && self.name.ends_with(".class")
    }

    fn is_signature(&self) -> bool {
        let upper = self.name.to_ascii_uppercase();
        upper.starts_with("META-INF/")
            && [".SF", ".RSA", ".DSA", ".EC"]
                .iter()
                .any(|suffix| upper.ends_with(suffix))
    }
}

fn read_entries(source: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut archive = ZipArchive::new(File::open(source)?)?;
    let mut entries = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let mut data = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
        file.read_to_end(&mut data)?;

        entries.push(ArchiveEntry {
            name: file.name().to_string(),
            stored: file.compression() == CompressionMethod::Stored,
            directory: file.is_dir(),
            data,
        });
    }

    Ok(entries)
}

/// Instruments every class of the jar at `source` and writes the result to `destination`.
///
/// # Errors
/// Returns [`crate::Error::Archive`] or [`crate::Error::FileError`] on I/O failure, and
/// unit errors wrapped in [`crate::Error::Unit`] naming `<jar>!<entry>`.
pub(crate) fn rewrite_archive(
    source: &Path,
    destination: &Path,
    rewriter: &CodeUnitRewriter<'_>,
    context: &RunContext,
    parallel: bool,
) -> Result<()> {
    let entries = read_entries(source)?;

    if entries.iter().any(ArchiveEntry::is_signature) {
        log::warn!(
            "{} is signed; rewriting its classes invalidates the signature",
            source.display()
        );
    }

    let rewrite = |index: usize, entry: &ArchiveEntry| -> Result<(usize, Option<Vec<u8>>)> {
        let outcome = rewriter
            .rewrite(&entry.data)
            .map_err(|e| e.in_unit(format!("{}!{}", source.display(), entry.name)))?;
        context.record_unit(&outcome);

        Ok(match outcome {
            UnitOutcome::Rewritten { bytes, .. } => (index, Some(bytes)),
            UnitOutcome::Unchanged => (index, None),
        })
    };

    let results = boxcar::Vec::new();
    if parallel {
        entries
            .par_iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_class())
            .try_for_each(|(index, entry)| {
                results.push(rewrite(index, entry)?);
                Ok::<_, Error>(())
            })?;
    } else {
        for (index, entry) in entries.iter().enumerate().filter(|(_, e)| e.is_class()) {
            results.push(rewrite(index, entry)?);
        }
    }

    let mut replaced: Vec<Option<Vec<u8>>> = vec![None; entries.len()];
    for (_, (index, bytes)) in results.iter() {
        replaced[*index] = bytes.clone();
    }

    create_parent(destination)?;
    let mut writer = ZipWriter::new(File::create(destination)?);

    for (entry, replacement) in entries.iter().zip(replaced) {
        let options = SimpleFileOptions::default()
            .last_modified_time(DateTime::default())
            .compression_method(if entry.stored {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflated
            });

        if entry.directory {
            writer.add_directory(entry.name.as_str(), options)?;
            continue;
        }

        writer.start_file(entry.name.as_str(), options)?;
        match replacement {
            Some(bytes) => writer.write_all(&bytes)?,
            None => {
                if !entry.is_class() {
                    context.record_resource();
                }
                writer.write_all(&entry.data)?;
            }
        }
    }

    writer.finish()?;
    Ok(())
}
