use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// An agent is reported inactive once it has been silent this long.
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    #[serde(default)]
    pub require_agent_auth: bool,
    /// agent_id -> bearer token, checked when `require_agent_auth` is set.
    #[serde(default)]
    pub agent_tokens: HashMap<String, String>,
    /// CORS allowed origins; empty allows any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

fn default_http_port() -> u16 {
    8080
}

fn default_agent_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            agent_timeout_secs: default_agent_timeout_secs(),
            require_agent_auth: false,
            agent_tokens: HashMap::new(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read server config {path}"))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse server config {path}"))?;
        if config.require_agent_auth && config.agent_tokens.is_empty() {
            anyhow::bail!("require_agent_auth is set but no agent_tokens are configured");
        }
        Ok(config)
    }

    /// True when `token` is the one configured for `agent_id`.
    pub fn verify_agent_token(&self, agent_id: &str, token: &str) -> bool {
        self.agent_tokens
            .get(agent_id)
            .is_some_and(|expected| expected == token)
    }
}
