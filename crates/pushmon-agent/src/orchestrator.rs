//! The agent run loop.
//!
//! One `tokio::select!` loop multiplexes the poll tick, the report tick,
//! the in-flight delivery and the shutdown token. At most one
//! report/deliver/restore cycle is outstanding at a time; collection keeps
//! running while a delivery is retrying.

use crate::transport::{Transport, TransportError};
use anyhow::{bail, Context};
use chrono::Utc;
use pushmon_collector::Collector;
use pushmon_common::types::MetricBatch;
use pushmon_runtime::{RetryError, RetryExecutor, WorkerPool};
use pushmon_storage::{DurableStore, RestoreOutcome, StorageController};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub agent_id: String,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    /// Time an in-flight or final delivery gets once shutdown starts.
    pub shutdown_grace: Duration,
    pub parallel_collection: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

/// What one report cycle did with the drained batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Nothing was collected since the previous report.
    Empty,
    Delivered { entries: usize },
    /// Delivery failed and the batch was put back into storage.
    Restored(RestoreOutcome),
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Retry(#[from] RetryError<TransportError>),

    #[error("delivery abandoned after {0:?} shutdown grace")]
    Abandoned(Duration),
}

#[derive(Debug, Default)]
struct Counters {
    polls: AtomicU64,
    collector_errors: AtomicU64,
    reports_delivered: AtomicU64,
    reports_restored: AtomicU64,
    reports_empty: AtomicU64,
    entries_delivered: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub polls: u64,
    pub collector_errors: u64,
    pub reports_delivered: u64,
    pub reports_restored: u64,
    pub reports_empty: u64,
    pub entries_delivered: u64,
}

type Delivery<'a> = Pin<Box<dyn Future<Output = ReportOutcome> + Send + 'a>>;

pub struct Orchestrator {
    config: OrchestratorConfig,
    storage: Arc<StorageController>,
    transport: Arc<dyn Transport>,
    retry: RetryExecutor,
    pool: Arc<WorkerPool>,
    collectors: Vec<Arc<dyn Collector>>,
    durable: Option<Arc<dyn DurableStore>>,
    state: Mutex<OrchestratorState>,
    counters: Arc<Counters>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        storage: Arc<StorageController>,
        transport: Arc<dyn Transport>,
        retry: RetryExecutor,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            config,
            storage,
            transport,
            retry,
            pool,
            collectors: Vec::new(),
            durable: None,
            state: Mutex::new(OrchestratorState::Idle),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_collectors(mut self, collectors: Vec<Arc<dyn Collector>>) -> Self {
        self.collectors = collectors;
        self
    }

    /// Persist the final batch here when it cannot be delivered at shutdown,
    /// and reload it on the next start.
    pub fn with_durable_store(mut self, durable: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: OrchestratorState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn storage(&self) -> &Arc<StorageController> {
        &self.storage
    }

    pub fn stats(&self) -> OrchestratorStats {
        let c = &self.counters;
        OrchestratorStats {
            polls: c.polls.load(Ordering::Relaxed),
            collector_errors: c.collector_errors.load(Ordering::Relaxed),
            reports_delivered: c.reports_delivered.load(Ordering::Relaxed),
            reports_restored: c.reports_restored.load(Ordering::Relaxed),
            reports_empty: c.reports_empty.load(Ordering::Relaxed),
            entries_delivered: c.entries_delivered.load(Ordering::Relaxed),
        }
    }

    /// Runs until `cancel` fires, then shuts down and returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the orchestrator was already started.
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != OrchestratorState::Idle {
                bail!("orchestrator already started (state {:?})", *state);
            }
            *state = OrchestratorState::Running;
        }

        tracing::info!(
            agent_id = %self.config.agent_id,
            collectors = self.collectors.len(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            report_interval_ms = self.config.report_interval.as_millis() as u64,
            parallel = self.config.parallel_collection,
            "Orchestrator started"
        );

        self.recover();
        if self.config.parallel_collection {
            self.pool.start();
        }

        let mut poll_tick = tokio::time::interval(self.config.poll_interval);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut report_tick = tokio::time::interval_at(
            Instant::now() + self.config.report_interval,
            self.config.report_interval,
        );
        report_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<Delivery<'_>> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = async {
                    match in_flight.as_mut() {
                        Some(delivery) => delivery.await,
                        None => std::future::pending().await,
                    }
                } => {
                    in_flight = None;
                    tracing::trace!(?outcome, "Report cycle finished");
                }
                _ = poll_tick.tick() => self.poll_once(&cancel).await,
                _ = report_tick.tick(), if in_flight.is_none() => {
                    in_flight = Some(Box::pin(self.report_once(&cancel)));
                }
            }
        }

        self.shutdown(in_flight).await;
        Ok(())
    }

    async fn shutdown(&self, in_flight: Option<Delivery<'_>>) {
        self.set_state(OrchestratorState::ShuttingDown);
        tracing::info!(
            grace_ms = self.config.shutdown_grace.as_millis() as u64,
            "Shutting down orchestrator"
        );

        if let Some(delivery) = in_flight {
            let outcome = delivery.await;
            tracing::debug!(?outcome, "In-flight report settled");
        }
        if self.config.parallel_collection {
            self.pool.stop_graceful().await;
        }
        self.final_report().await;

        self.set_state(OrchestratorState::Stopped);
        tracing::info!(stats = ?self.stats(), "Orchestrator stopped");
    }

    /// Runs every collector once, inline or on the worker pool.
    pub async fn poll_once(&self, cancel: &CancellationToken) {
        self.counters.polls.fetch_add(1, Ordering::Relaxed);

        if !self.config.parallel_collection {
            for collector in &self.collectors {
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = collector.collect(cancel, &self.storage) {
                    self.counters.collector_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(collector = collector.name(), error = %e, "Collection failed");
                }
            }
            return;
        }

        for collector in &self.collectors {
            let collector = collector.clone();
            let storage = self.storage.clone();
            let counters = self.counters.clone();
            let cancel = cancel.clone();
            let task = async move {
                collector
                    .collect(&cancel, &storage)
                    .inspect_err(|_| {
                        counters.collector_errors.fetch_add(1, Ordering::Relaxed);
                    })
                    .with_context(|| format!("collector {} failed", collector.name()))
            };
            if let Err(e) = self.pool.submit(task).await {
                tracing::debug!(error = %e, "Worker pool closed, skipping remaining collectors");
                break;
            }
        }
    }

    /// Drains storage and delivers the batch, restoring it on failure.
    pub async fn report_once(&self, cancel: &CancellationToken) -> ReportOutcome {
        let batch = self.storage.report_all();
        if batch.is_empty() {
            self.counters.reports_empty.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Nothing to report");
            return ReportOutcome::Empty;
        }

        match self.deliver(&batch, cancel).await {
            Ok(()) => {
                self.counters.reports_delivered.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .entries_delivered
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                tracing::debug!(entries = batch.len(), "Report delivered");
                ReportOutcome::Delivered {
                    entries: batch.len(),
                }
            }
            Err(e) => {
                let outcome = self.storage.restore_latest(&batch.entries, batch.captured_at);
                self.counters.reports_restored.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    entries = batch.len(),
                    gauges_skipped = outcome.gauges_skipped,
                    "Report not delivered, batch restored"
                );
                ReportOutcome::Restored(outcome)
            }
        }
    }

    async fn deliver(
        &self,
        batch: &MetricBatch,
        cancel: &CancellationToken,
    ) -> Result<(), DeliveryError> {
        let attempt = self
            .retry
            .run(cancel, TransportError::is_retryable, || self.transport.send(batch));
        tokio::pin!(attempt);

        tokio::select! {
            biased;
            result = &mut attempt => return result.map_err(DeliveryError::from),
            _ = cancel.cancelled() => {}
        }

        let grace = self.config.shutdown_grace;
        match tokio::time::timeout(grace, attempt).await {
            Ok(result) => result.map_err(DeliveryError::from),
            Err(_) => Err(DeliveryError::Abandoned(grace)),
        }
    }

    /// Best-effort flush on shutdown: one attempt bounded by the grace period.
    async fn final_report(&self) {
        let batch = self.storage.report_all();
        if batch.is_empty() {
            return;
        }

        let grace = self.config.shutdown_grace;
        let error = match tokio::time::timeout(grace, self.transport.send(&batch)).await {
            Ok(Ok(())) => {
                self.counters.reports_delivered.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .entries_delivered
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                tracing::info!(entries = batch.len(), "Final report delivered");
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {grace:?}"),
        };

        self.storage.restore_latest(&batch.entries, batch.captured_at);
        self.counters.reports_restored.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(error = %error, entries = batch.len(), "Final report failed");

        let Some(durable) = &self.durable else {
            return;
        };
        let pending = MetricBatch::new(batch.captured_at, self.storage.snapshot(false));
        match durable.save(&pending) {
            Ok(()) => tracing::info!(entries = pending.len(), "Undelivered metrics persisted"),
            Err(e) => tracing::error!(error = %e, "Failed to persist undelivered metrics"),
        }
    }

    /// Restores whatever the previous run persisted, then clears it.
    fn recover(&self) {
        let Some(durable) = &self.durable else {
            return;
        };

        let batch = match durable.load() {
            Ok(Some(batch)) if !batch.is_empty() => batch,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load persisted metrics");
                return;
            }
        };

        let outcome = self.storage.restore_latest(&batch.entries, batch.captured_at);
        tracing::info!(
            counters = outcome.counters,
            gauges = outcome.gauges_applied,
            "Recovered metrics from previous run"
        );
        if let Err(e) = durable.save(&MetricBatch::empty(Utc::now())) {
            tracing::warn!(error = %e, "Failed to clear persisted metrics");
        }
    }
}
