#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use pushmon_server::app;
use pushmon_server::config::ServerConfig;
use pushmon_server::state::AppState;
use serde_json::Value;
use tower::util::ServiceExt;

pub struct TestContext {
    pub state: AppState,
    pub app: axum::Router,
}

pub fn build_test_context() -> TestContext {
    build_test_context_with(ServerConfig::default())
}

pub fn build_test_context_with(config: ServerConfig) -> TestContext {
    let state = AppState::new(config);
    let app = app::build_http_app(state.clone());
    TestContext { state, app }
}

/// Sends one request through the router and decodes the JSON envelope.
pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value, Option<String>)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder = builder.header("Content-Type", "application/json");

    let req_body = body.map(|b| b.to_string()).unwrap_or_default();
    let req = builder.body(Body::from(req_body))?;

    let resp = app.clone().oneshot(req).await?;

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX).await?;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    Ok((status, json, trace_id))
}

pub async fn get(app: &axum::Router, uri: &str) -> Result<(StatusCode, Value)> {
    let (status, body, _) = request_json(app, "GET", uri, None, None).await?;
    Ok((status, body))
}

pub fn assert_ok_envelope(body: &Value) {
    assert_eq!(body["err_code"], 0, "unexpected envelope: {body}");
    assert_eq!(body["err_msg"], "success");
    assert!(body["trace_id"].as_str().is_some_and(|s| s.len() == 16));
}
