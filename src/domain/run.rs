//! Run configuration and outcome types.
//!
//! A run is one supervised execution of the target application: launch,
//! watch the log heartbeat, collect the files it produced, archive them.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::snapshot::SnapshotReport;

/// Log file name used when none is configured
pub const DEFAULT_LOG_FILE_NAME: &str = "log.txt";

/// Prefix of the reserved argument that names the application's log file
pub const RESERVED_LOG_FLAG: &str = "-log=";

/// Output directories tracked under the output root by default
pub const DEFAULT_TRACKED_DIRS: [&str; 3] = ["Logs", "Profiling", "Screenshots"];

/// Tracked directory that holds the log file by default
pub const DEFAULT_LOG_DIR: &str = "Logs";

/// Errors detected before a run starts. No work has been done when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Executable does not exist: {0}")]
    ExecutableMissing(PathBuf),

    #[error("Executable is a directory, expected a runnable file: {0}")]
    ExecutableIsDirectory(PathBuf),

    #[error("Executable has no usable file name: {0}")]
    ExecutableName(PathBuf),

    #[error("Argument '{0}' sets the log file name, which is reserved")]
    ReservedArgument(String),

    #[error("Stall timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Log file name must not be empty")]
    EmptyLogFileName,
}

/// Immutable description of one supervised run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Target executable
    pub executable: PathBuf,

    /// Log file name passed through the reserved `-log=` argument
    pub log_file_name: String,

    /// Stall window: the log must advance at least once per window
    pub timeout: Duration,

    /// Caller-supplied arguments, appended after the reserved log argument
    pub extra_args: Vec<String>,

    /// Directory the application writes its output under
    pub output_root: PathBuf,

    /// Subdirectories of `output_root` whose new files are collected
    pub tracked_dirs: Vec<String>,

    /// Subdirectory of `output_root` containing the log file
    pub log_dir: String,

    /// Where the archive of this run's output is written
    pub archive_path: PathBuf,
}

impl RunConfig {
    /// Create a run config with the default output layout derived from the executable
    pub fn new(
        executable: impl Into<PathBuf>,
        timeout: Duration,
        extra_args: Vec<String>,
        archive_path: impl Into<PathBuf>,
    ) -> Self {
        let executable = executable.into();
        let output_root = default_output_root(&executable);
        Self {
            executable,
            log_file_name: DEFAULT_LOG_FILE_NAME.to_string(),
            timeout,
            extra_args,
            output_root,
            tracked_dirs: DEFAULT_TRACKED_DIRS.iter().map(|d| d.to_string()).collect(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            archive_path: archive_path.into(),
        }
    }

    /// Override the output root
    pub fn with_output_root(mut self, output_root: impl Into<PathBuf>) -> Self {
        self.output_root = output_root.into();
        self
    }

    /// Override the log file name
    pub fn with_log_file_name(mut self, name: impl Into<String>) -> Self {
        self.log_file_name = name.into();
        self
    }

    /// Override the tracked directories and which of them holds the log
    pub fn with_tracked_dirs(mut self, tracked_dirs: Vec<String>, log_dir: impl Into<String>) -> Self {
        self.tracked_dirs = tracked_dirs;
        self.log_dir = log_dir.into();
        self
    }

    /// Check everything that can be checked before launching
    pub fn validate(&self) -> Result<(), ValidationError> {
        match std::fs::metadata(&self.executable) {
            Err(_) => return Err(ValidationError::ExecutableMissing(self.executable.clone())),
            Ok(meta) if meta.is_dir() => {
                return Err(ValidationError::ExecutableIsDirectory(self.executable.clone()))
            }
            Ok(_) => {}
        }

        if self.executable_stem().is_none() {
            return Err(ValidationError::ExecutableName(self.executable.clone()));
        }

        if let Some(arg) = self.extra_args.iter().find(|a| a.contains(RESERVED_LOG_FLAG)) {
            return Err(ValidationError::ReservedArgument(arg.clone()));
        }

        if self.timeout.is_zero() {
            return Err(ValidationError::ZeroTimeout);
        }

        if self.log_file_name.is_empty() {
            return Err(ValidationError::EmptyLogFileName);
        }

        Ok(())
    }

    /// Executable file name without its extension, used to find its processes
    pub fn executable_stem(&self) -> Option<String> {
        self.executable
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
    }

    /// Full argument list: the reserved log argument first, then the extras
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.extra_args.len() + 1);
        args.push(format!("{}{}", RESERVED_LOG_FLAG, self.log_file_name));
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Absolute location of the heartbeat log file
    pub fn log_file_path(&self) -> PathBuf {
        self.output_root.join(&self.log_dir).join(&self.log_file_name)
    }

    /// Absolute paths of the tracked output directories
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        self.tracked_dirs.iter().map(|d| self.output_root.join(d)).collect()
    }
}

/// `<exe dir>/<exe stem>/Saved`, where the application keeps its output
pub fn default_output_root(executable: &Path) -> PathBuf {
    let dir = executable.parent().unwrap_or_else(|| Path::new("."));
    let stem = executable
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    dir.join(stem).join("Saved")
}

/// Latest modification time seen in the tracked directories before launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Baseline(SystemTime);

impl Baseline {
    /// Baseline for directories that hold no files
    pub const EMPTY: Baseline = Baseline(SystemTime::UNIX_EPOCH);

    pub fn new(time: SystemTime) -> Self {
        Self(time)
    }

    pub fn time(&self) -> SystemTime {
        self.0
    }

    /// Whether a file modified at `mtime` was produced after this baseline
    pub fn is_before(&self, mtime: SystemTime) -> bool {
        mtime > self.0
    }

    /// Fold another observation in, keeping the latest
    pub fn merge(self, other: Baseline) -> Baseline {
        self.max(other)
    }
}

impl Default for Baseline {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl std::fmt::Display for Baseline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let time: DateTime<Utc> = self.0.into();
        write!(f, "{}", time.to_rfc3339())
    }
}

/// Why the heartbeat monitor decided the application was frozen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallReason {
    /// The log file's modification time did not advance within one window
    LogUnchanged,

    /// The log file could not be stat'ed
    LogUnreadable,
}

/// How the supervised process came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The process exited on its own
    Completed,

    /// The heartbeat stalled and the process was killed
    TimedOut { reason: StallReason },

    /// External cancellation killed the process
    Cancelled,
}

impl RunOutcome {
    /// Whether the terminator was invoked for this run
    pub fn was_terminated(&self) -> bool {
        !matches!(self, RunOutcome::Completed)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::TimedOut { reason: StallReason::LogUnchanged } => {
                write!(f, "timed out (log unchanged)")
            }
            RunOutcome::TimedOut { reason: StallReason::LogUnreadable } => {
                write!(f, "timed out (log unreadable)")
            }
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Everything a finished run produced
#[derive(Debug)]
pub struct RunReport {
    /// How the process ended
    pub outcome: RunOutcome,

    /// Exit code if the process exited normally
    pub exit_code: Option<i32>,

    /// Baseline captured before launch
    pub baseline: Baseline,

    /// Files collected into the archive, and any copy failures
    pub snapshot: SnapshotReport,

    /// Location of the finished archive
    pub archive_path: PathBuf,

    /// When the process was launched
    pub started_at: DateTime<Utc>,

    /// When packaging finished
    pub finished_at: DateTime<Utc>,
}
