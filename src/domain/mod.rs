//! Domain types for stallguard.
//!
//! - Run: configuration, baseline, outcome and report of a supervised run
//! - Credentials: basic-auth pair shared by uploader and store

pub mod credentials;
pub mod run;

pub use credentials::Credentials;
pub use run::{
    default_output_root, Baseline, RunConfig, RunOutcome, RunReport, StallReason, ValidationError,
    DEFAULT_LOG_DIR, DEFAULT_LOG_FILE_NAME, DEFAULT_TRACKED_DIRS, RESERVED_LOG_FLAG,
};
