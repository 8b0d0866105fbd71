//! stallguard - supervised runs of unattended applications
//!
//! Launches a target executable, watches its log file as a heartbeat and
//! kills the process when the log stops advancing. Whatever the run wrote
//! to its output directories after launch is archived and uploaded to an
//! artifact store.
//!
//! # Modules
//!
//! - `core`: Supervision pipeline (baseline, launcher, heartbeat, snapshot, archive)
//! - `domain`: Data structures (RunConfig, Baseline, RunOutcome, RunReport)
//! - `adapters`: Uploaders for finished archives
//! - `store`: Write-once artifact store and its HTTP surface
//! - `task`: Job-coordinator integration (Task, TaskFactory)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Serve an artifact store
//! stallguard serve --addr 127.0.0.1:8080 --dir ./artifacts
//!
//! # Supervise one run and upload its output
//! stallguard run --exe ./Game --timeout 60 --upload-url http://127.0.0.1:8080
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod store;
pub mod task;

// Re-export main types at crate root for convenience
pub use adapters::{HttpUploader, UploadError, Uploader};
pub use core::{run_supervised, ProcessTerminator, RunError};
pub use domain::{Baseline, Credentials, RunConfig, RunOutcome, RunReport, StallReason};
pub use store::{ArtifactStore, StoreError};
pub use task::{SupervisedRunFactory, Task, TaskFactory, TaskParams, TaskResult};
