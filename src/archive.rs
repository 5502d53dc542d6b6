//! CBZ packaging of a downloaded work.
//!
//! [`archive`] folds every file under a work root into
//! `{root}/{work name}.cbz` and then removes the chapter directories, so a
//! finished run leaves one archive per work. It is synchronous; async
//! callers run it inside `tokio::task::spawn_blocking`.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::download::PARTIAL_SUFFIX;
use crate::download::filename::sanitize_work_name;

/// Archive file extension.
pub const ARCHIVE_EXTENSION: &str = "cbz";

const TEMP_SUFFIX: &str = ".tmp";

/// Why no archive was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSkip {
    /// The work root does not exist.
    MissingRoot,
    /// The work root holds no files.
    NothingToArchive,
}

/// Result of an archive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// An archive was written.
    Created {
        /// Archive location.
        path: PathBuf,
        /// Number of entries written.
        entries: usize,
    },
    /// Nothing was written; the tree is untouched.
    Skipped(ArchiveSkip),
}

/// Errors raised while writing the archive or pruning directories.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Filesystem failure.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path being read, written or removed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Container encoding failure.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ArchiveError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Returns the archive path for a work root: `{root}/{sanitized root name}.cbz`.
#[must_use]
pub fn archive_path(root: &Path) -> PathBuf {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    root.join(format!("{}.{ARCHIVE_EXTENSION}", sanitize_work_name(&name)))
}

/// Packages every file under `root` into one CBZ and removes the chapter directories.
///
/// Entries are the relative paths of the files, `/`-separated, in
/// lexicographic order. The archive is written under a temporary name and
/// renamed once complete; only then are the immediate subdirectories of
/// `root` removed. Loose files in `root` are archived and left in place.
///
/// # Errors
///
/// Returns [`ArchiveError`] if reading the tree, writing the archive or
/// removing a directory fails. A failed write leaves the tree untouched.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn archive(root: &Path) -> Result<ArchiveOutcome, ArchiveError> {
    if !root.is_dir() {
        warn!("work directory missing, nothing to archive");
        return Ok(ArchiveOutcome::Skipped(ArchiveSkip::MissingRoot));
    }

    let target = archive_path(root);
    let mut temp_name = target.clone().into_os_string();
    temp_name.push(TEMP_SUFFIX);
    let temp = PathBuf::from(temp_name);

    let mut files = Vec::new();
    collect_files(root, &mut files)?;
    files.retain(|path| *path != target && *path != temp && !is_partial(path));

    if files.is_empty() {
        warn!("work directory holds no pages, nothing to archive");
        return Ok(ArchiveOutcome::Skipped(ArchiveSkip::NothingToArchive));
    }

    if let Err(e) = write_archive(root, &files, &temp) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    fs::rename(&temp, &target).map_err(|e| ArchiveError::io(&target, e))?;

    let removed = remove_subdirectories(root)?;
    info!(
        archive = %target.display(),
        entries = files.len(),
        removed_dirs = removed,
        "archive created"
    );

    Ok(ArchiveOutcome::Created {
        path: target,
        entries: files.len(),
    })
}

/// Recursively collects files under `dir`, sorted by name at every level.
fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ArchiveError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| ArchiveError::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ArchiveError::io(dir, e))?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn is_partial(path: &Path) -> bool {
    path.to_string_lossy().ends_with(PARTIAL_SUFFIX)
}

/// Relative entry name with `/` separators.
fn entry_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn write_archive(root: &Path, files: &[PathBuf], temp: &Path) -> Result<(), ArchiveError> {
    let file = File::create(temp).map_err(|e| ArchiveError::io(temp, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    // Page images are already compressed.
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    for path in files {
        let name = entry_name(root, path);
        debug!(entry = %name, "adding");
        zip.start_file(name, options)?;
        let mut source = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
        io::copy(&mut source, &mut zip).map_err(|e| ArchiveError::io(path, e))?;
    }

    zip.finish()?;
    Ok(())
}

/// Removes every immediate subdirectory of `root`. Returns how many were removed.
fn remove_subdirectories(root: &Path) -> Result<usize, ArchiveError> {
    let mut removed = 0;
    for entry in fs::read_dir(root).map_err(|e| ArchiveError::io(root, e))? {
        let path = entry.map_err(|e| ArchiveError::io(root, e))?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path).map_err(|e| ArchiveError::io(&path, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}
