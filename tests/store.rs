//! Artifact Store Integration Tests
//!
//! Write-once semantics under concurrency, and the HTTP surface with
//! basic authentication in front of it.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use stallguard::store::{router, ArtifactStore, StoreError};
use stallguard::Credentials;
use tempfile::TempDir;
use tower::ServiceExt;

fn credentials() -> Credentials {
    Credentials {
        username: "uploader".to_string(),
        password: "hunter2".to_string(),
    }
}

fn guarded_app(temp: &TempDir) -> Router {
    let store = Arc::new(ArtifactStore::open(temp.path()).unwrap());
    router(store, Some(credentials()))
}

fn post(uri: &str, body: &'static str, auth: Option<(&str, &str)>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some((user, pass)) = auth {
        let token = STANDARD.encode(format!("{}:{}", user, pass));
        builder = builder.header(AUTHORIZATION, format!("Basic {}", token));
    }
    builder.body(Body::from(body)).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_concurrent_saves_of_one_id_have_one_winner() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ArtifactStore::open(temp.path()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let body = format!("writer {}", i);
                store.save("shared.zip", body.as_bytes()).await
            })
        })
        .collect();

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(StoreError::AlreadyExists(id)) => assert_eq!(id, "shared.zip"),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(wins, 1);

    let stored = std::fs::read_to_string(temp.path().join("shared.zip")).unwrap();
    assert!(stored.starts_with("writer "));
}

#[tokio::test]
async fn test_concurrent_saves_of_distinct_ids_all_succeed() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ArtifactStore::open(temp.path()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.save(&format!("run-{}.zip", i), b"data").await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 8);
}

#[tokio::test]
async fn test_mutations_require_credentials() {
    let temp = TempDir::new().unwrap();
    let app = guarded_app(&temp);

    let anonymous = app.clone().oneshot(post("/upload/a.zip", "x", None)).await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(anonymous.headers()[WWW_AUTHENTICATE], "Basic");

    let wrong = app
        .clone()
        .oneshot(post("/upload/a.zip", "x", Some(("uploader", "wrong"))))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert!(!temp.path().join("a.zip").exists());

    let delete = app.oneshot(post("/delete/a.zip", "", None)).await.unwrap();
    assert_eq!(delete.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_authenticated_lifecycle_over_http() {
    let temp = TempDir::new().unwrap();
    let app = guarded_app(&temp);
    let auth = Some(("uploader", "hunter2"));

    let saved = app.clone().oneshot(post("/upload/a.zip", "zipbytes", auth)).await.unwrap();
    assert_eq!(saved.status(), StatusCode::OK);

    // Retrieval needs no credentials
    let fetched = app.clone().oneshot(get("/files/a.zip")).await.unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
    let body = axum::body::to_bytes(fetched.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"zipbytes");

    let again = app.clone().oneshot(post("/upload/a.zip", "other", auth)).await.unwrap();
    assert_eq!(again.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let deleted = app.clone().oneshot(post("/delete/a.zip", "", auth)).await.unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);
    let deleted_again = app.clone().oneshot(post("/delete/a.zip", "", auth)).await.unwrap();
    assert_eq!(deleted_again.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let gone = app.clone().oneshot(get("/files/a.zip")).await.unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);

    let reused = app.oneshot(post("/upload/a.zip", "fresh", auth)).await.unwrap();
    assert_eq!(reused.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bad_requests() {
    let temp = TempDir::new().unwrap();
    let app = guarded_app(&temp);
    let auth = Some(("uploader", "hunter2"));

    let empty = app.clone().oneshot(post("/upload/a.zip", "", auth)).await.unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(empty.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Request body is empty");

    let escaping = app.oneshot(post("/upload/..%2Fescape", "x", auth)).await.unwrap();
    assert_eq!(escaping.status(), StatusCode::BAD_REQUEST);
    assert!(!temp.path().parent().unwrap().join("escape").exists());
}

#[test]
fn test_store_requires_directory_root() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("plain");
    std::fs::write(&file, "x").unwrap();

    assert!(matches!(
        ArtifactStore::open(temp.path().join("missing")),
        Err(StoreError::RootNotDirectory(_))
    ));
    assert!(matches!(
        ArtifactStore::open(&file),
        Err(StoreError::RootNotDirectory(_))
    ));
}
