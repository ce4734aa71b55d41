use crate::config::ServerConfig;
use chrono::{DateTime, Duration, Utc};
use pushmon_common::types::AgentInfo;
use pushmon_storage::StorageController;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct AgentEntry {
    last_seen: DateTime<Utc>,
    batches: u64,
}

/// Agents that have reported at least once since startup.
pub struct AgentRegistry {
    agents: HashMap<String, AgentEntry>,
    timeout: Duration,
}

impl AgentRegistry {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            agents: HashMap::new(),
            timeout: Duration::seconds(timeout_secs as i64),
        }
    }

    /// Records an accepted batch from `agent_id`.
    pub fn update_agent(&mut self, agent_id: &str) {
        let now = Utc::now();
        self.agents
            .entry(agent_id.to_string())
            .and_modify(|entry| {
                entry.last_seen = now;
                entry.batches += 1;
            })
            .or_insert(AgentEntry {
                last_seen: now,
                batches: 1,
            });
    }

    /// All known agents, most recently seen first.
    pub fn list_agents(&self) -> Vec<AgentInfo> {
        let now = Utc::now();
        let mut agents: Vec<AgentInfo> = self
            .agents
            .iter()
            .map(|(id, entry)| self.info(id, entry, now))
            .collect();
        agents.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        agents
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<AgentInfo> {
        self.agents
            .get(agent_id)
            .map(|entry| self.info(agent_id, entry, Utc::now()))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn info(&self, agent_id: &str, entry: &AgentEntry, now: DateTime<Utc>) -> AgentInfo {
        AgentInfo {
            agent_id: agent_id.to_string(),
            last_seen: entry.last_seen,
            active: now - entry.last_seen < self.timeout,
            batches: entry.batches,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    /// Authoritative totals merged from every agent.
    pub storage: Arc<StorageController>,
    pub agent_registry: Arc<Mutex<AgentRegistry>>,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            storage: Arc::new(StorageController::new()),
            agent_registry: Arc::new(Mutex::new(AgentRegistry::new(config.agent_timeout_secs))),
            start_time: Utc::now(),
            config: Arc::new(config),
        }
    }
}
