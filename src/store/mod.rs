//! Artifact store: a directory of write-once files behind a small HTTP API.

pub mod auth;
pub mod files;
pub mod http;

pub use files::{ArtifactStore, ContentRecord, StoreError};
pub use http::{router, serve, MAX_UPLOAD_BYTES};
