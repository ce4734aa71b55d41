//! Delivery of batches to the collector server.

use async_trait::async_trait;
use pushmon_common::types::MetricBatch;
use serde::Serialize;
use std::time::Duration;

/// Maximum number of characters kept from a rejection body.
const MAX_BODY_CHARS: usize = 200;

/// Path of the ingest endpoint on the collector server.
pub const INGEST_PATH: &str = "/v1/metrics/batch";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    /// 5xx or 429 from the server.
    #[error("server unavailable: status={status}")]
    Unavailable { status: u16 },

    /// Any other non-2xx status: the server will not accept this batch as is.
    #[error("server rejected batch: status={status}, body={body}")]
    Rejected { status: u16, body: String },

    #[error("failed to build request: {0}")]
    Encode(String),
}

impl TransportError {
    /// Timeouts, connection failures and server-side unavailability are
    /// worth retrying; everything else fails the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout | TransportError::Connect(_) | TransportError::Unavailable { .. }
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_builder() {
            TransportError::Encode(e.to_string())
        } else {
            TransportError::Connect(e.to_string())
        }
    }
}

/// Sends one batch to the collector. Implementations must not retry on
/// their own; the orchestrator owns the retry policy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, batch: &MetricBatch) -> Result<(), TransportError>;
}

#[derive(Serialize)]
struct IngestBody<'a> {
    agent_id: &'a str,
    #[serde(flatten)]
    batch: &'a MetricBatch,
}

/// JSON-over-HTTP transport posting to [`INGEST_PATH`].
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    agent_id: String,
    auth_token: Option<String>,
}

impl HttpTransport {
    pub fn new(
        endpoint: &str,
        agent_id: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransportError::Encode(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("{}{INGEST_PATH}", endpoint.trim_end_matches('/')),
            agent_id: agent_id.to_string(),
            auth_token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &MetricBatch) -> Result<(), TransportError> {
        let body = IngestBody {
            agent_id: &self.agent_id,
            batch,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.auth_token {
            request = request
                .bearer_auth(token)
                .header("agent-id", self.agent_id.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(count = batch.len(), "Batch delivered");
            return Ok(());
        }

        if status.is_server_error() || status.as_u16() == 429 {
            return Err(TransportError::Unavailable {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.as_u16(),
            body: truncate(&body, MAX_BODY_CHARS),
        })
    }
}
