use crate::logging::TraceId;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use pushmon_common::types::{AgentInfo, IngestRequest, MetricEntry, MetricKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Uniform response envelope.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 0 on success
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "unauthorized" => 1002,
        "not_found" => 1004,
        "empty_batch" => 1104,
        "internal_error" => 1500,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/metrics/batch", post(ingest_batch))
        .route("/v1/metrics", get(list_metrics))
        .route("/v1/metrics/{kind}/{name}", get(get_metric))
        .route("/v1/agents", get(list_agents))
        .route("/v1/agents/{id}", get(get_agent))
}

#[derive(Serialize)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    agent_count: usize,
    metric_count: usize,
}

async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    let agent_count = state
        .agent_registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .len();
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime,
            agent_count,
            metric_count: state.storage.len(),
        },
    )
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    accepted: usize,
    counters: usize,
    gauges_applied: usize,
    /// Gauges ignored because a newer sample was already stored.
    gauges_stale: usize,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Validates a decoded batch; returns the error code and message to send.
fn validate(request: &IngestRequest) -> Result<(), (&'static str, String)> {
    if request.agent_id.trim().is_empty() {
        return Err(("bad_request", "agent_id is required".to_string()));
    }
    if request.batch.is_empty() {
        return Err(("empty_batch", "entries must not be empty".to_string()));
    }
    if let Some(entry) = request.batch.entries.iter().find(|e| e.name().trim().is_empty()) {
        return Err((
            "bad_request",
            format!("{} entry with empty name", entry.kind()),
        ));
    }
    Ok(())
}

/// Merges one agent batch into the authoritative store.
///
/// The body is decoded by hand so that malformed JSON still gets the
/// envelope and a 400, which agents treat as permanent.
async fn ingest_batch(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: IngestRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed metric batch");
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                &format!("invalid batch: {e}"),
            );
        }
    };

    if let Err((code, msg)) = validate(&request) {
        return error_response(StatusCode::BAD_REQUEST, &trace_id, code, &msg);
    }

    if state.config.require_agent_auth {
        let header_agent = headers.get("agent-id").and_then(|v| v.to_str().ok());
        let authorized = header_agent.is_none_or(|id| id == request.agent_id)
            && bearer_token(&headers)
                .is_some_and(|token| state.config.verify_agent_token(&request.agent_id, token));
        if !authorized {
            tracing::warn!(agent_id = %request.agent_id, "Rejected unauthenticated batch");
            return error_response(
                StatusCode::UNAUTHORIZED,
                &trace_id,
                "unauthorized",
                "invalid agent token",
            );
        }
    }

    let outcome = state.storage.merge(&request.batch);
    state
        .agent_registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .update_agent(&request.agent_id);

    tracing::debug!(
        agent_id = %request.agent_id,
        entries = request.batch.len(),
        gauges_stale = outcome.gauges_stale,
        "Batch merged"
    );

    success_response(
        StatusCode::OK,
        &trace_id,
        IngestResponse {
            accepted: request.batch.len(),
            counters: outcome.counters,
            gauges_applied: outcome.gauges_applied,
            gauges_stale: outcome.gauges_stale,
        },
    )
}

#[derive(Debug, Deserialize)]
struct MetricFilter {
    kind: Option<String>,
    name_contains: Option<String>,
}

async fn list_metrics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(filter): Query<MetricFilter>,
) -> Response {
    let kind = match filter.kind.as_deref().map(str::parse::<MetricKind>) {
        Some(Err(e)) => {
            return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &e)
        }
        Some(Ok(kind)) => Some(kind),
        None => None,
    };

    let items: Vec<MetricEntry> = state
        .storage
        .snapshot(false)
        .into_iter()
        .filter(|e| kind.is_none_or(|k| e.kind() == k))
        .filter(|e| {
            filter
                .name_contains
                .as_deref()
                .is_none_or(|needle| e.name().contains(needle))
        })
        .collect();

    success_response(StatusCode::OK, &trace_id, items)
}

#[derive(Serialize)]
struct MetricValue {
    name: String,
    kind: MetricKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    #[serde(rename = "sampledAt", skip_serializing_if = "Option::is_none")]
    sampled_at: Option<DateTime<Utc>>,
}

async fn get_metric(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    let kind: MetricKind = match kind.parse() {
        Ok(kind) => kind,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &e),
    };

    let found = state.storage.snapshot(false).into_iter().find_map(|e| match e {
        MetricEntry::Counter { name: n, delta } if kind == MetricKind::Counter && n == name => {
            Some(MetricValue {
                name: n,
                kind,
                delta: Some(delta),
                value: None,
                sampled_at: None,
            })
        }
        MetricEntry::Gauge {
            name: n,
            value,
            sampled_at,
        } if kind == MetricKind::Gauge && n == name => Some(MetricValue {
            name: n,
            kind,
            delta: None,
            value: Some(value),
            sampled_at: Some(sampled_at),
        }),
        _ => None,
    });

    match found {
        Some(metric) => success_response(StatusCode::OK, &trace_id, metric),
        None => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("{kind} {name} not found"),
        ),
    }
}

async fn list_agents(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let agents: Vec<AgentInfo> = state
        .agent_registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .list_agents();
    success_response(StatusCode::OK, &trace_id, agents)
}

async fn get_agent(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let agent = state
        .agent_registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get_agent(&id);
    match agent {
        Some(agent) => success_response(StatusCode::OK, &trace_id, agent),
        None => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("agent {id} not found"),
        ),
    }
}
