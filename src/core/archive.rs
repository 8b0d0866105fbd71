//! Archiver: package a staging tree into a single zip file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Errors from packaging a directory tree
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archive source is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to create archive {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to add {path} to archive: {source}")]
    Add {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Write every file under `source_dir` into a zip at `destination`, with entry
/// names relative to `source_dir`. An empty tree yields a valid empty archive.
#[instrument(skip_all, fields(source = %source_dir.display(), destination = %destination.display()))]
pub fn archive_dir(source_dir: &Path, destination: &Path) -> Result<PathBuf, ArchiveError> {
    if !source_dir.is_dir() {
        return Err(ArchiveError::NotADirectory(source_dir.to_path_buf()));
    }

    let file = File::create(destination).map_err(|e| ArchiveError::Create {
        path: destination.to_path_buf(),
        source: e,
    })?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = 0usize;
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ArchiveError::Walk {
            path: source_dir.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(source_dir) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        // Zip entry names always use forward slashes
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        zip.start_file(name, options)?;
        let mut input = File::open(entry.path()).map_err(|e| ArchiveError::Add {
            path: entry.path().to_path_buf(),
            source: e,
        })?;
        std::io::copy(&mut input, &mut zip).map_err(|e| ArchiveError::Add {
            path: entry.path().to_path_buf(),
            source: e,
        })?;
        entries += 1;
    }

    let mut writer = zip.finish()?;
    writer.flush().map_err(|e| ArchiveError::Create {
        path: destination.to_path_buf(),
        source: e,
    })?;

    debug!(entries, "archive written");
    Ok(destination.to_path_buf())
}
