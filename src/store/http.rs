//! HTTP surface of the artifact store.
//!
//! - `POST /upload/{content_id}` saves the raw request body
//! - `POST /delete/{content_id}` removes a stored artifact
//! - `GET /files/{content_id}` serves stored artifacts as static files
//!
//! When credentials are configured, the two mutating routes require HTTP
//! basic auth. Retrieval stays open so uploaded URLs can be shared.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};

use crate::domain::Credentials;

use super::auth::require_basic_auth;
use super::files::{ArtifactStore, StoreError};

/// Largest accepted upload body
pub const MAX_UPLOAD_BYTES: usize = 1 << 30;

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            StoreError::InvalidContentId(_) | StoreError::EmptyBody => StatusCode::BAD_REQUEST,
            StoreError::Io { .. } => {
                error!(error = %self, "store IO failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Build the store router over `store`, guarding mutations with `auth` if given
pub fn router(store: Arc<ArtifactStore>, auth: Option<Credentials>) -> Router {
    let files = ServeDir::new(store.root());

    let mut mutating = Router::new()
        .route("/upload/{content_id}", post(upload))
        .route("/delete/{content_id}", post(delete))
        .with_state(store);
    if let Some(credentials) = auth {
        mutating = mutating.route_layer(middleware::from_fn_with_state(
            credentials,
            require_basic_auth,
        ));
    }

    Router::new()
        .merge(mutating)
        .nest_service("/files", files)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

async fn upload(
    State(store): State<Arc<ArtifactStore>>,
    Path(content_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, StoreError> {
    if body.is_empty() {
        return Err(StoreError::EmptyBody);
    }
    store.save(&content_id, &body).await?;
    Ok(StatusCode::OK)
}

async fn delete(
    State(store): State<Arc<ArtifactStore>>,
    Path(content_id): Path<String>,
) -> Result<StatusCode, StoreError> {
    store.delete(&content_id).await?;
    Ok(StatusCode::OK)
}

/// Serve `router` on `listener` until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!("serving artifacts at http://{}/files/", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(temp: &TempDir) -> Router {
        let store = Arc::new(ArtifactStore::open(temp.path()).unwrap());
        router(store, None)
    }

    fn post_req(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_fetch() {
        let temp = TempDir::new().unwrap();

        let response = app(&temp).oneshot(post_req("/upload/a.txt", "hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(&temp)
            .oneshot(Request::get("/files/a.txt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn test_empty_body_is_bad_request() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp).oneshot(post_req("/upload/a.txt", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!temp.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_store_failures_are_server_errors() {
        let temp = TempDir::new().unwrap();
        let app = app(&temp);

        let first = app.clone().oneshot(post_req("/upload/a.txt", "x")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app.clone().oneshot(post_req("/upload/a.txt", "y")).await.unwrap();
        assert_eq!(second.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let missing = app.clone().oneshot(post_req("/delete/nope", "")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::INTERNAL_SERVER_ERROR);

        for uri in ["/delete/.", "/delete/.."] {
            let directory = app.clone().oneshot(post_req(uri, "")).await.unwrap();
            assert_eq!(directory.status(), StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
        }
        assert!(temp.path().join("a.txt").is_file());
    }
}
