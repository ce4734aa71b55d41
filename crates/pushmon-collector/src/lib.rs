//! Metric collection plug-ins for the pushmon agent.
//!
//! Each [`Collector`] samples one category of metrics (runtime counters,
//! CPU, memory, load) and records them straight into the agent's
//! [`StorageController`], where they wait for the next report.

pub mod cpu;
pub mod load;
pub mod memory;
pub mod runtime;

use anyhow::{bail, Result};
use pushmon_storage::StorageController;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Names accepted by [`build`], in their default order.
pub const ALL_COLLECTORS: &[&str] = &["runtime", "cpu", "memory", "load"];

/// A metric source run on every poll tick.
///
/// Collectors may be run concurrently from the agent's worker pool, so the
/// trait requires `Send + Sync` and takes `&self`; collectors with mutable
/// sampling state keep it behind a lock.
pub trait Collector: Send + Sync {
    /// Returns the collector name (e.g., `"cpu"`), used for logging.
    fn name(&self) -> &str;

    /// Samples current values into `storage`.
    ///
    /// Long-running collectors should check `cancel` and return early once
    /// it fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn collect(&self, cancel: &CancellationToken, storage: &StorageController) -> Result<()>;
}

/// Instantiates the collectors listed in `names`.
///
/// # Errors
///
/// Returns an error naming the first unknown collector.
pub fn build(names: &[String]) -> Result<Vec<Arc<dyn Collector>>> {
    names
        .iter()
        .map(|name| -> Result<Arc<dyn Collector>> {
            Ok(match name.as_str() {
                "runtime" => Arc::new(runtime::RuntimeCollector::new()),
                "cpu" => Arc::new(cpu::CpuCollector::new()),
                "memory" => Arc::new(memory::MemoryCollector::new()),
                "load" => Arc::new(load::LoadCollector::new()),
                other => bail!("unknown collector: {other}"),
            })
        })
        .collect()
}
