use crate::MetricStore;
use chrono::{DateTime, Utc};
use pushmon_common::types::MetricEntry;
use std::collections::BTreeMap;

/// In-memory [`MetricStore`] keyed by metric name.
#[derive(Debug, Default)]
pub struct MemStore {
    counters: BTreeMap<String, i64>,
    gauges: BTreeMap<String, (f64, DateTime<Utc>)>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(
        counters: &BTreeMap<String, i64>,
        gauges: &BTreeMap<String, (f64, DateTime<Utc>)>,
    ) -> Vec<MetricEntry> {
        let mut out = Vec::with_capacity(counters.len() + gauges.len());
        out.extend(
            counters
                .iter()
                .map(|(name, delta)| MetricEntry::counter(name.clone(), *delta)),
        );
        out.extend(
            gauges
                .iter()
                .map(|(name, (value, at))| MetricEntry::gauge(name.clone(), *value, *at)),
        );
        out
    }
}

impl MetricStore for MemStore {
    fn accumulate(&mut self, name: &str, delta: i64) {
        let slot = self.counters.entry(name.to_string()).or_insert(0);
        let total = *slot;
        *slot = match total.checked_add(delta) {
            Some(sum) => sum,
            None => {
                tracing::warn!(metric = %name, total, delta, "Counter overflow, clamping");
                total.saturating_add(delta)
            }
        };
    }

    fn set_latest(&mut self, name: &str, value: f64, at: DateTime<Utc>) {
        self.gauges.insert(name.to_string(), (value, at));
    }

    fn snapshot(&self) -> Vec<MetricEntry> {
        Self::entries(&self.counters, &self.gauges)
    }

    fn counter(&self, name: &str) -> Option<i64> {
        self.counters.get(name).copied()
    }

    fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).map(|(value, _)| *value)
    }

    fn len(&self) -> usize {
        self.counters.len() + self.gauges.len()
    }

    fn take_snapshot(&mut self) -> Vec<MetricEntry> {
        let counters = std::mem::take(&mut self.counters);
        let gauges = std::mem::take(&mut self.gauges);
        Self::entries(&counters, &gauges)
    }
}
