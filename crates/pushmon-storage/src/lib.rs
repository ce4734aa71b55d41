//! Current-state metric storage for the pushmon agent and collector.
//!
//! [`MemStore`](store::MemStore) keeps raw counters and gauges;
//! [`StorageController`](controller::StorageController) wraps any
//! [`MetricStore`] and enforces the merge rules: counters are additive,
//! gauges resolve by timestamp, and an undelivered batch can be restored
//! without double counting or reverting a fresher sample.

pub mod controller;
pub mod durable;
pub mod error;
pub mod store;

#[cfg(test)]
mod tests;

pub use controller::{MergeOutcome, RestoreOutcome, StorageController};
pub use durable::DurableStore;
pub use store::MemStore;

use chrono::{DateTime, Utc};
use pushmon_common::types::MetricEntry;

/// Raw keyed storage for the two metric kinds.
///
/// Implementations hold no locks of their own; the controller serializes
/// every call. Snapshots list counters first, then gauges, each group in a
/// stable order.
pub trait MetricStore: Send + Sync {
    /// Adds `delta` to the counter `name`, creating it at zero if absent.
    /// Totals saturate at the `i64` bounds.
    fn accumulate(&mut self, name: &str, delta: i64);

    /// Replaces the gauge `name` with `value` sampled at `at`.
    fn set_latest(&mut self, name: &str, value: f64, at: DateTime<Utc>);

    /// Returns every stored entry without modifying the store.
    fn snapshot(&self) -> Vec<MetricEntry>;

    fn counter(&self, name: &str) -> Option<i64>;

    fn gauge(&self, name: &str) -> Option<f64>;

    /// Number of stored entries across both kinds.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every stored entry and empties the store.
    fn take_snapshot(&mut self) -> Vec<MetricEntry>;
}
