//! Snapshot differ: copy the files a run produced into a staging tree.
//!
//! Copy failures are collected, never fatal. A file that cannot be copied is
//! skipped, and the rest of its directory and every sibling directory still
//! get copied. The report carries the failures so the caller can log them.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::domain::Baseline;

/// A single failure while collecting a run's output
#[derive(Debug, Error)]
pub enum SnapshotCopyError {
    #[error("Source is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of collecting one run's output
#[derive(Debug, Default)]
pub struct SnapshotReport {
    /// Staging-relative paths of the copied files
    pub copied: Vec<PathBuf>,

    /// Everything that could not be copied
    pub errors: Vec<SnapshotCopyError>,
}

impl SnapshotReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A tracked source directory and the name it gets inside the staging tree
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    pub path: PathBuf,
    pub name: String,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

/// Copy every file newer than `baseline` from each source into `dest_root/<name>/`,
/// mirroring paths relative to the source.
pub fn copy_newer(baseline: Baseline, sources: &[SnapshotSource], dest_root: &Path) -> SnapshotReport {
    let mut report = SnapshotReport::default();

    for source in sources {
        let dest = dest_root.join(&source.name);
        copy_newer_in(baseline, &source.path, &dest, Path::new(&source.name), &mut report);
    }

    for error in &report.errors {
        warn!(error = %error, "snapshot copy failure");
    }
    debug!(copied = report.copied.len(), errors = report.errors.len(), "snapshot collected");

    report
}

fn copy_newer_in(
    baseline: Baseline,
    src_dir: &Path,
    dst_dir: &Path,
    prefix: &Path,
    report: &mut SnapshotReport,
) {
    match std::fs::metadata(src_dir) {
        // Absent directories simply produced nothing
        Err(_) => return,
        Ok(meta) if !meta.is_dir() => {
            report.errors.push(SnapshotCopyError::NotADirectory(src_dir.to_path_buf()));
            return;
        }
        Ok(_) => {}
    }

    for entry in WalkDir::new(src_dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.errors.push(SnapshotCopyError::Walk {
                    path: src_dir.to_path_buf(),
                    source: e,
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
            Some(modified) => modified,
            None => continue,
        };
        if !baseline.is_before(modified) {
            continue;
        }

        let relative = match entry.path().strip_prefix(src_dir) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => continue,
        };
        let target = dst_dir.join(&relative);

        match copy_file(entry.path(), &target) {
            Ok(()) => report.copied.push(prefix.join(&relative)),
            Err(e) => report.errors.push(SnapshotCopyError::Copy {
                from: entry.path().to_path_buf(),
                to: target,
                source: e,
            }),
        }
    }
}

fn copy_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(from, to)?;
    Ok(())
}
