//! Baseline capture for tracked output directories.
//!
//! The baseline is the newest file modification time that existed before
//! launch. Anything modified after it afterwards belongs to the run.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::domain::Baseline;

/// Errors from scanning a directory for its latest modification time
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Latest modification time of any regular file under `dir`, recursively.
///
/// A missing directory, or one without files, yields the epoch. Fails only
/// when the path exists and is not a directory, or the walk itself fails.
pub fn latest_mod_time(dir: &Path) -> Result<SystemTime, ScanError> {
    match std::fs::metadata(dir) {
        Err(_) => return Ok(SystemTime::UNIX_EPOCH),
        Ok(meta) if !meta.is_dir() => return Err(ScanError::NotADirectory(dir.to_path_buf())),
        Ok(_) => {}
    }

    let mut latest = SystemTime::UNIX_EPOCH;
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| ScanError::Walk {
            path: dir.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok());
        if let Some(modified) = modified {
            latest = latest.max(modified);
        }
    }

    Ok(latest)
}

/// Capture the baseline across all tracked directories.
///
/// A directory that cannot be scanned is logged and contributes nothing;
/// the snapshot step will skip it the same way.
pub fn capture(dirs: &[PathBuf]) -> Baseline {
    dirs.iter().fold(Baseline::EMPTY, |baseline, dir| match latest_mod_time(dir) {
        Ok(time) => {
            debug!(dir = %dir.display(), "scanned tracked directory");
            baseline.merge(Baseline::new(time))
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "skipping tracked directory in baseline");
            baseline
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::time::Duration;
    use tempfile::TempDir;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_missing_directory_is_epoch() {
        let temp = TempDir::new().unwrap();
        let time = latest_mod_time(&temp.path().join("nope")).unwrap();
        assert_eq!(time, SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn test_empty_directory_is_epoch() {
        let temp = TempDir::new().unwrap();
        assert_eq!(latest_mod_time(temp.path()).unwrap(), SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn test_regular_file_is_rejected() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(latest_mod_time(&file), Err(ScanError::NotADirectory(_))));
    }

    #[test]
    fn test_latest_is_found_recursively() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let old = temp.path().join("old.txt");
        let new = nested.join("new.txt");
        std::fs::write(&old, "old").unwrap();
        std::fs::write(&new, "new").unwrap();
        set_file_mtime(&old, FileTime::from_system_time(at(1_000))).unwrap();
        set_file_mtime(&new, FileTime::from_system_time(at(2_000))).unwrap();

        assert_eq!(latest_mod_time(temp.path()).unwrap(), at(2_000));
    }

    #[test]
    fn test_capture_takes_max_and_skips_bad_dirs() {
        let temp = TempDir::new().unwrap();
        let logs = temp.path().join("Logs");
        let shots = temp.path().join("Screenshots");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::create_dir_all(&shots).unwrap();

        let a = logs.join("a.log");
        let b = shots.join("b.png");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();
        set_file_mtime(&a, FileTime::from_system_time(at(5_000))).unwrap();
        set_file_mtime(&b, FileTime::from_system_time(at(7_000))).unwrap();

        let not_dir = temp.path().join("Profiling");
        std::fs::write(&not_dir, "oops").unwrap();

        let baseline = capture(&[logs, shots, not_dir, temp.path().join("Missing")]);
        assert_eq!(baseline, Baseline::new(at(7_000)));
    }
}
