//! Core supervision logic.
//!
//! This module contains:
//! - Baseline: latest mtime across the tracked output directories
//! - Launcher: runs the target with the reserved log argument
//! - Heartbeat: watches the log and kills the target when it stalls
//! - Terminator: finds and kills processes by executable name
//! - Snapshot: copies files newer than the baseline into a staging tree
//! - Archive: zips the staging tree
//! - Supervisor: the pipeline tying these together

pub mod archive;
pub mod baseline;
pub mod heartbeat;
pub mod launcher;
pub mod snapshot;
pub mod supervisor;
pub mod terminator;

// Re-export commonly used types
pub use archive::{archive_dir, ArchiveError};
pub use baseline::ScanError;
pub use heartbeat::{HeartbeatMonitor, HeartbeatState, Tick};
pub use launcher::{launch, spawn_target, LaunchError, LaunchedTarget};
pub use snapshot::{copy_newer, SnapshotCopyError, SnapshotReport, SnapshotSource};
pub use supervisor::{run_supervised, RunError};
pub use terminator::{ProcessEntry, ProcessTerminator, SysinfoTerminator, TerminationError};
