//! Adapter interfaces for external systems.
//!
//! Uploaders ship a finished run archive somewhere it can be retrieved from.

pub mod http_uploader;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub use http_uploader::HttpUploader;

/// Errors from uploading an artifact
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to read artifact {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact path has no file name: {0}")]
    FileName(PathBuf),

    #[error("Upload request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Trait for artifact uploaders
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Human-readable uploader name
    fn name(&self) -> &str;

    /// Upload the file at `path` and return the URL it can be retrieved from
    async fn upload(&self, path: &Path) -> Result<String, UploadError>;
}
