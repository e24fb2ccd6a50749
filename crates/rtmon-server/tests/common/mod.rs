#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use axum::http::{Request, StatusCode};
use rtmon_server::app;
use rtmon_server::state::AppState;
use rtmon_storage::syncer::SyncMode;
use rtmon_storage::{FileSyncer, MemStorage, MetricsRepository};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub repo: Arc<dyn MetricsRepository>,
    pub app: axum::Router,
}

impl TestContext {
    pub fn snapshot_path(&self) -> PathBuf {
        self.temp_dir.path().join("metrics-db.json")
    }
}

pub fn build_test_context() -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let repo: Arc<dyn MetricsRepository> = Arc::new(MemStorage::new());
    let app = app::build_http_app(AppState::new(repo.clone()));
    Ok(TestContext {
        temp_dir,
        repo,
        app,
    })
}

/// In-memory context whose router checks and emits `HashSHA256` with `key`.
pub fn build_signed_context(key: &str) -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let repo: Arc<dyn MetricsRepository> = Arc::new(MemStorage::new());
    let app = app::build_http_app(AppState::new(repo.clone()).with_key(Some(key)));
    Ok(TestContext {
        temp_dir,
        repo,
        app,
    })
}

/// Context backed by a synchronously flushed snapshot file.
pub async fn build_file_context() -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let syncer = FileSyncer::open(
        temp_dir.path().join("metrics-db.json"),
        SyncMode::Synchronous,
        false,
    )
    .await?;
    let repo: Arc<dyn MetricsRepository> = syncer;
    let app = app::build_http_app(AppState::new(repo.clone()));
    Ok(TestContext {
        temp_dir,
        repo,
        app,
    })
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, String, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    (status, String::from_utf8_lossy(&bytes).to_string(), trace_id)
}

pub async fn request_text(
    app: &axum::Router,
    method: &str,
    uri: &str,
) -> (StatusCode, String, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "text/plain")
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Value,
) -> (StatusCode, Value, Option<String>) {
    request_raw_json(app, method, uri, body.to_string()).await
}

pub async fn request_raw_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: String,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .expect("request should build");
    let (status, text, trace_id) = send(app, req).await;
    let json = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))
    };
    (status, json, trace_id)
}

pub fn gzip(body: &[u8]) -> Vec<u8> {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(body).expect("gzip write");
    gz.finish().expect("gzip finish")
}

/// Posts a gzip-encoded JSON body, optionally with a `HashSHA256` header.
/// Returns the status, the response `HashSHA256` header and the body text.
pub async fn request_gzip_json(
    app: &axum::Router,
    uri: &str,
    compressed: Vec<u8>,
    signature: Option<&str>,
) -> (StatusCode, Option<String>, String) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .header("Content-Encoding", "gzip");
    if let Some(sig) = signature {
        builder = builder.header("HashSHA256", sig);
    }
    let req = builder
        .body(Body::from(compressed))
        .expect("request should build");
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let hash = resp
        .headers()
        .get("HashSHA256")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    (status, hash, String::from_utf8_lossy(&bytes).to_string())
}
