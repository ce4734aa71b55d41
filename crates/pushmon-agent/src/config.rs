use crate::orchestrator::OrchestratorConfig;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub server_endpoint: String,
    /// Use https when `server_endpoint` has no scheme
    #[serde(default)]
    pub tls: bool,
    /// Optional bearer token checked by the collector server
    pub auth_token: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Delays between delivery attempts; attempts = len + 1
    #[serde(default = "default_backoff_schedule")]
    pub backoff_schedule_secs: Vec<u64>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Run collectors on the worker pool instead of inline
    #[serde(default)]
    pub parallel_collection: bool,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_collectors")]
    pub collectors: Vec<String>,
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_backoff_schedule() -> Vec<u64> {
    vec![1, 3, 5]
}

fn default_request_timeout() -> u64 {
    5
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_collectors() -> Vec<String> {
    pushmon_collector::ALL_COLLECTORS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl AgentConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read agent config {path}"))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse agent config {path}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent_id.trim().is_empty() {
            bail!("agent_id must not be empty");
        }
        if self.server_endpoint.trim().is_empty() {
            bail!("server_endpoint must not be empty");
        }
        if self.poll_interval_secs == 0 || self.report_interval_secs == 0 {
            bail!("poll_interval_secs and report_interval_secs must be positive");
        }
        Ok(())
    }

    /// Build the HTTP base URL from server_endpoint and tls config.
    pub fn http_endpoint(&self) -> String {
        let addr = self.server_endpoint.trim().trim_end_matches('/');
        if addr.contains("://") {
            return addr.to_string();
        }
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{addr}")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            agent_id: self.agent_id.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            report_interval: Duration::from_secs(self.report_interval_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            parallel_collection: self.parallel_collection,
        }
    }
}
