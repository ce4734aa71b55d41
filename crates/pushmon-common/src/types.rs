use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two metric kinds understood by the pipeline.
///
/// # Examples
///
/// ```
/// use pushmon_common::types::MetricKind;
///
/// let kind: MetricKind = "Gauge".parse().unwrap();
/// assert_eq!(kind, MetricKind::Gauge);
/// assert_eq!(kind.to_string(), "gauge");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonically accumulated integer; reports carry the delta since the last report.
    Counter,
    /// Point-in-time float; newest sample wins.
    Gauge,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
        }
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            _ => Err(format!("unknown metric kind: {s}")),
        }
    }
}

/// One unit of a batch on the wire.
///
/// Serialized with an inline `kind` tag, so exactly one of `delta` / `value`
/// is present:
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use pushmon_common::types::MetricEntry;
///
/// let counter = MetricEntry::counter("PollCount", 3);
/// let json = serde_json::to_value(&counter).unwrap();
/// assert_eq!(json["kind"], "counter");
/// assert_eq!(json["delta"], 3);
///
/// let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let gauge = MetricEntry::gauge("Temp", 21.5, at);
/// let json = serde_json::to_value(&gauge).unwrap();
/// assert_eq!(json["kind"], "gauge");
/// assert_eq!(json["sampledAt"], "2024-01-01T00:00:00Z");
/// assert!(json.get("delta").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MetricEntry {
    Counter {
        name: String,
        delta: i64,
    },
    Gauge {
        name: String,
        value: f64,
        #[serde(rename = "sampledAt")]
        sampled_at: DateTime<Utc>,
    },
}

impl MetricEntry {
    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        MetricEntry::Counter {
            name: name.into(),
            delta,
        }
    }

    pub fn gauge(name: impl Into<String>, value: f64, sampled_at: DateTime<Utc>) -> Self {
        MetricEntry::Gauge {
            name: name.into(),
            value,
            sampled_at,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MetricEntry::Counter { name, .. } | MetricEntry::Gauge { name, .. } => name,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricEntry::Counter { .. } => MetricKind::Counter,
            MetricEntry::Gauge { .. } => MetricKind::Gauge,
        }
    }
}

/// The ordered entries produced by one atomic snapshot, plus its capture instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    pub captured_at: DateTime<Utc>,
    pub entries: Vec<MetricEntry>,
}

impl MetricBatch {
    pub fn new(captured_at: DateTime<Utc>, entries: Vec<MetricEntry>) -> Self {
        Self {
            captured_at,
            entries,
        }
    }

    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self::new(captured_at, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Sum of all counter deltas carried by this batch.
    pub fn counter_total(&self) -> i64 {
        self.entries
            .iter()
            .map(|e| match e {
                MetricEntry::Counter { delta, .. } => *delta,
                MetricEntry::Gauge { .. } => 0,
            })
            .sum()
    }
}

/// Body of `POST /v1/metrics/batch`: a batch tagged with the reporting agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub agent_id: String,
    #[serde(flatten)]
    pub batch: MetricBatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub last_seen: DateTime<Utc>,
    pub active: bool,
    /// Batches accepted from this agent since the server started.
    pub batches: u64,
}
