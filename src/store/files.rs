//! File-backed artifact store.
//!
//! Each content ID names exactly one file directly under the root. Saving
//! never overwrites and deleting a missing ID fails, so a historical run
//! artifact cannot be replaced by accident. A deleted ID may be saved again.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store root is not an existing directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error("Invalid content ID: '{0}'")]
    InvalidContentId(String),

    #[error("Request body is empty")]
    EmptyBody,

    #[error("{0} already exists and cannot be saved again")]
    AlreadyExists(String),

    #[error("{0} does not exist and cannot be deleted")]
    NotFound(String),

    #[error("{0} is a directory and cannot be deleted")]
    IsDirectory(String),

    #[error("IO error on {content_id}: {source}")]
    Io {
        content_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// One live artifact: a content ID and the file holding its bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
    pub content_id: String,
    pub path: PathBuf,
}

/// Content ID → file mapping rooted at one directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open a store over an existing directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::RootNotDirectory(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a content ID to its file, rejecting anything that could escape the root
    pub fn path_for(&self, content_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !content_id.is_empty()
            && content_id != "."
            && content_id != ".."
            && !content_id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(StoreError::InvalidContentId(content_id.to_string()));
        }
        Ok(self.root.join(content_id))
    }

    /// Store `bytes` under `content_id`. Fails if the ID is already taken.
    ///
    /// Creation is exclusive, so of two concurrent saves of one ID exactly
    /// one succeeds.
    pub async fn save(&self, content_id: &str, bytes: &[u8]) -> Result<ContentRecord, StoreError> {
        let path = self.path_for(content_id)?;

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(content_id.to_string()))
            }
            Err(e) => return Err(io_error(content_id, e)),
        };

        let written = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            // A half-written file would block the ID forever
            if let Err(cleanup) = fs::remove_file(&path).await {
                warn!(content_id, error = %cleanup, "failed to remove partial artifact");
            }
            return Err(io_error(content_id, e));
        }

        info!(content_id, bytes = bytes.len(), "artifact saved");
        Ok(ContentRecord {
            content_id: content_id.to_string(),
            path,
        })
    }

    /// Remove the file for `content_id`. Fails if it is missing or a directory.
    pub async fn delete(&self, content_id: &str) -> Result<(), StoreError> {
        // The root and its parent are directories, not malformed IDs
        if content_id == "." || content_id == ".." {
            return Err(StoreError::IsDirectory(content_id.to_string()));
        }
        let path = self.path_for(content_id)?;

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(content_id.to_string()))
            }
            Err(e) => return Err(io_error(content_id, e)),
        };
        if metadata.is_dir() {
            return Err(StoreError::IsDirectory(content_id.to_string()));
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(content_id, "artifact deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(content_id, "artifact vanished during delete");
                Err(StoreError::NotFound(content_id.to_string()))
            }
            Err(e) => Err(io_error(content_id, e)),
        }
    }
}

fn io_error(content_id: &str, source: std::io::Error) -> StoreError {
    StoreError::Io {
        content_id: content_id.to_string(),
        source,
    }
}
