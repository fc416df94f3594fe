use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::io::Cursor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use zipblob::http::{self, AppState};
use zipblob::store::MemoryBlobStore;
use zipblob::{Settings, ZipService};

fn app(store: &MemoryBlobStore) -> Router {
    let settings = Settings {
        bucket: "test-bucket".to_string(),
        ..Settings::default()
    };
    let zips = Arc::new(ZipService::new(Arc::new(store.clone()), &settings));
    http::router(Arc::new(AppState {
        zips,
        shutdown: CancellationToken::new(),
    }))
}

async fn post_zip(app: Router, body: &str) -> (StatusCode, Value) {
    let request = Request::post("/api/zip")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_zip_returns_archive_path() {
    let store = MemoryBlobStore::new();
    store.insert("docs/a.txt", "hello");
    store.insert("docs/b.txt", "world!");

    let (status, body) = post_zip(app(&store), r#"{"filePaths": ["docs/a.txt", "docs/b.txt"]}"#).await;
    assert_eq!(status, StatusCode::OK);

    let path = body["zipFilePath"].as_str().expect("zipFilePath in response");
    assert!(path.starts_with("zip-files/"));
    assert!(path.ends_with(".zip"));

    let data = store.get(path).expect("archive written to the store");
    let mut archive = zip::ZipArchive::new(Cursor::new(data.to_vec())).unwrap();
    assert_eq!(archive.len(), 2);
    assert_eq!(archive.by_index(0).unwrap().name(), "a.txt");
    assert_eq!(archive.by_index(1).unwrap().name(), "b.txt");
}

#[tokio::test]
async fn test_pascal_case_field_is_accepted() {
    let store = MemoryBlobStore::new();
    store.insert("a.txt", "hello");

    let (status, body) = post_zip(app(&store), r#"{"FilePaths": ["a.txt"]}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["zipFilePath"].is_string());
}

#[tokio::test]
async fn test_missing_paths_is_bad_request() {
    let store = MemoryBlobStore::new();

    for body in ["{}", r#"{"filePaths": null}"#, r#"{"filePaths": []}"#, r#"{"filePaths": ["", null]}"#] {
        let (status, response) = post_zip(app(&store), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
        assert_eq!(response, json!({"errors": ["FilePaths is required."]}), "body: {body}");
    }

    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn test_blank_entry_is_bad_request() {
    let store = MemoryBlobStore::new();
    store.insert("a.txt", "hello");

    let (status, body) = post_zip(app(&store), r#"{"filePaths": ["a.txt", "  "]}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"errors": ["FilePaths must not contain empty entries."]}));
    assert_eq!(store.keys(), vec!["a.txt"]);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let store = MemoryBlobStore::new();

    let (status, body) = post_zip(app(&store), r#"{"filePaths": ["#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let errors = body["errors"].as_array().expect("errors array");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_string());
}

#[tokio::test]
async fn test_missing_source_is_generic_server_error() {
    let store = MemoryBlobStore::new();
    store.insert("a.txt", "hello");

    let (status, body) = post_zip(app(&store), r#"{"filePaths": ["a.txt", "secret/missing.txt"]}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "internal server error"}));
    assert!(store.keys_with_prefix("zip-files/").is_empty());
}

#[tokio::test]
async fn test_health() {
    let store = MemoryBlobStore::new();
    let request = Request::get("/health").body(Body::empty()).unwrap();

    let response = app(&store).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}
