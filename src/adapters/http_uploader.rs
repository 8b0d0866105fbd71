//! Uploader for the artifact store's HTTP API.
//!
//! Posts the raw file bytes to `{base}/upload/{name}`. The retrieval URL is
//! `{base}/files/{name}` by the store's naming convention; the response body
//! is not inspected.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::Credentials;

use super::{UploadError, Uploader};

/// Uploads artifacts to a store over HTTP
#[derive(Debug, Clone)]
pub struct HttpUploader {
    /// Store base URL without trailing slash
    base_url: String,
    /// Sent as basic auth when present
    credentials: Option<Credentials>,
    /// HTTP client
    client: reqwest::Client,
}

impl HttpUploader {
    /// Uploader without authentication
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_basic_auth(base_url, "", "")
    }

    /// Uploader that sends basic auth if both username and password are non-empty
    pub fn with_basic_auth(base_url: impl Into<String>, username: &str, password: &str) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: Credentials::from_parts(username, password),
            client: reqwest::Client::new(),
        }
    }

    /// Same credentials, different store
    pub fn with_base_url(&self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: self.credentials.clone(),
            client: self.client.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload endpoint for a content ID
    pub fn upload_url(&self, content_id: &str) -> String {
        format!("{}/upload/{}", self.base_url, content_id)
    }

    /// Retrieval URL for a content ID
    pub fn retrieval_url(&self, content_id: &str) -> String {
        format!("{}/files/{}", self.base_url, content_id)
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    fn name(&self) -> &str {
        "http"
    }

    async fn upload(&self, path: &Path) -> Result<String, UploadError> {
        let content_id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::FileName(path.to_path_buf()))?;

        // Read before connecting so a missing file never reaches the network
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| UploadError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })?;

        let url = self.upload_url(&content_id);
        debug!(url = %url, bytes = bytes.len(), "uploading artifact");

        let mut request = self.client.post(&url).body(bytes);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let retrieval_url = self.retrieval_url(&content_id);
        info!(url = %retrieval_url, "artifact uploaded");
        Ok(retrieval_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_follow_store_convention() {
        let uploader = HttpUploader::new("http://store:8080/");
        assert_eq!(uploader.base_url(), "http://store:8080");
        assert_eq!(uploader.upload_url("run.zip"), "http://store:8080/upload/run.zip");
        assert_eq!(uploader.retrieval_url("run.zip"), "http://store:8080/files/run.zip");
    }

    #[test]
    fn test_partial_credentials_send_no_auth() {
        assert!(HttpUploader::with_basic_auth("http://a", "user", "").credentials.is_none());
        assert!(HttpUploader::with_basic_auth("http://a", "user", "pass").credentials.is_some());
    }

    #[test]
    fn test_with_base_url_keeps_credentials() {
        let uploader = HttpUploader::with_basic_auth("http://a", "user", "pass");
        let moved = uploader.with_base_url("http://b/");
        assert_eq!(moved.base_url(), "http://b");
        assert_eq!(moved.credentials, uploader.credentials);
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_network() {
        // Nothing listens on port 9 (discard); a network attempt would surface as Transport
        let uploader = HttpUploader::new("http://127.0.0.1:9");
        let err = uploader
            .upload(Path::new("/nonexistent/stallguard/run.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::ReadFile { .. }));
    }
}
