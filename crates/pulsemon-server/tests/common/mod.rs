#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use pulsemon_server::app;
use pulsemon_server::config::ServerConfig;
use pulsemon_server::state::AppState;
use pulsemon_storage::backend::Backend;
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub backend: Backend,
    pub app: axum::Router,
}

/// Server backed by a synchronous file mirror in a fresh temp dir.
pub async fn build_test_context(hash_key: Option<&str>) -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let config = ServerConfig {
        file_storage_path: Some(temp_dir.path().to_string_lossy().to_string()),
        hash_key: hash_key.map(str::to_string),
        ..Default::default()
    };

    let backend = Backend::open(&config.storage_settings()).await?;
    let state = AppState::new(&backend, config);
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        backend,
        app,
    })
}

pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

pub async fn request_raw(
    app: &axum::Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> RawResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(Body::from(body)).expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read")
        .to_vec();

    RawResponse {
        status,
        headers,
        body,
    }
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Value,
) -> (StatusCode, Value) {
    let resp = request_raw(
        app,
        method,
        uri,
        &[("Content-Type", "application/json")],
        body.to_string().into_bytes(),
    )
    .await;
    (resp.status, resp.json())
}

pub async fn request_no_body(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, String) {
    let resp = request_raw(app, method, uri, &[], Vec::new()).await;
    (resp.status, resp.text())
}

pub fn assert_err_envelope(body: &Value, code: &str) {
    assert_eq!(body["err_code"], code, "unexpected envelope: {body}");
    assert!(body["err_msg"].is_string());
    assert!(body["trace_id"].is_string());
}
