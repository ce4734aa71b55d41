use crate::store::MemStore;
use crate::MetricStore;
use chrono::{DateTime, Duration, Utc};
use pushmon_common::types::{MetricBatch, MetricEntry};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Result of re-applying an undelivered batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub counters: usize,
    pub gauges_applied: usize,
    /// Gauges left alone because a newer collect already replaced them.
    pub gauges_skipped: usize,
}

/// Result of merging an agent batch into the authoritative store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub counters: usize,
    pub gauges_applied: usize,
    /// Gauges whose sample was not newer than the stored one.
    pub gauges_stale: usize,
}

struct Inner<S> {
    store: S,
    /// Timestamp of the value last written per gauge by collect or merge.
    gauge_stamps: HashMap<String, DateTime<Utc>>,
    last_stamp: Option<DateTime<Utc>>,
}

impl<S> Inner<S> {
    /// Wall-clock instant, bumped so that every stamp is strictly later than
    /// the previous one handed out by this controller.
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::nanoseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }
}

/// Concurrency-safe facade over a [`MetricStore`].
///
/// A single reader/writer lock serializes collect, snapshot, restore and
/// merge, so a flush or a restore is never observed half-applied.
pub struct StorageController<S: MetricStore = MemStore> {
    inner: RwLock<Inner<S>>,
}

impl StorageController<MemStore> {
    pub fn new() -> Self {
        Self::with_store(MemStore::new())
    }
}

impl Default for StorageController<MemStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MetricStore> StorageController<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            inner: RwLock::new(Inner {
                store,
                gauge_stamps: HashMap::new(),
                last_stamp: None,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner<S>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<S>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `delta` to the local accumulator of counter `name`.
    pub fn collect_counter(&self, name: &str, delta: i64) {
        self.write().store.accumulate(name, delta);
    }

    /// Records `value` as the latest sample of gauge `name`, stamped now.
    pub fn collect_gauge(&self, name: &str, value: f64) {
        let mut inner = self.write();
        let at = inner.next_stamp();
        inner.gauge_stamps.insert(name.to_string(), at);
        inner.store.set_latest(name, value, at);
    }

    /// Returns every counter and gauge. With `flush`, the live maps are
    /// emptied in the same critical section.
    pub fn snapshot(&self, flush: bool) -> Vec<MetricEntry> {
        if flush {
            self.write().store.take_snapshot()
        } else {
            self.read().store.snapshot()
        }
    }

    /// Drains the store into a batch stamped with its capture instant.
    ///
    /// Any collect that lands after this call carries a strictly later
    /// stamp than `captured_at`, which is what [`Self::restore_latest`]
    /// relies on.
    pub fn report_all(&self) -> MetricBatch {
        let mut inner = self.write();
        let captured_at = inner.next_stamp();
        let entries = inner.store.take_snapshot();
        MetricBatch::new(captured_at, entries)
    }

    /// Re-applies a batch that could not be delivered.
    ///
    /// Counter deltas are added back. A gauge is written back only if no
    /// collect for that name happened strictly after `captured_at`.
    pub fn restore_latest(
        &self,
        entries: &[MetricEntry],
        captured_at: DateTime<Utc>,
    ) -> RestoreOutcome {
        let mut outcome = RestoreOutcome::default();
        let mut inner = self.write();

        for entry in entries {
            match entry {
                MetricEntry::Counter { name, delta } => {
                    inner.store.accumulate(name, *delta);
                    outcome.counters += 1;
                }
                MetricEntry::Gauge {
                    name,
                    value,
                    sampled_at,
                } => {
                    let superseded = inner
                        .gauge_stamps
                        .get(name)
                        .is_some_and(|stamp| *stamp > captured_at);
                    if superseded {
                        tracing::debug!(metric = %name, "Skipping gauge restore, newer sample present");
                        outcome.gauges_skipped += 1;
                    } else {
                        inner.store.set_latest(name, *value, *sampled_at);
                        outcome.gauges_applied += 1;
                    }
                }
            }
        }

        outcome
    }

    /// Folds a delivered batch into this store as the authoritative total.
    ///
    /// Counter deltas are added; a gauge replaces the stored value only when
    /// its sample is strictly newer.
    pub fn merge(&self, batch: &MetricBatch) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut inner = self.write();

        for entry in &batch.entries {
            match entry {
                MetricEntry::Counter { name, delta } => {
                    inner.store.accumulate(name, *delta);
                    outcome.counters += 1;
                }
                MetricEntry::Gauge {
                    name,
                    value,
                    sampled_at,
                } => {
                    let stale = inner
                        .gauge_stamps
                        .get(name)
                        .is_some_and(|stamp| *stamp >= *sampled_at);
                    if stale {
                        outcome.gauges_stale += 1;
                    } else {
                        inner.gauge_stamps.insert(name.clone(), *sampled_at);
                        inner.store.set_latest(name, *value, *sampled_at);
                        outcome.gauges_applied += 1;
                    }
                }
            }
        }

        outcome
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.read().store.counter(name)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.read().store.gauge(name)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.read().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().store.is_empty()
    }
}
