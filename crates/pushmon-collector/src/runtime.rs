use crate::Collector;
use anyhow::Result;
use pushmon_storage::StorageController;
use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Agent self-metrics: a `PollCount` counter bumped on every poll and a
/// `RandomValue` gauge used to verify end-to-end delivery.
pub struct RuntimeCollector;

impl RuntimeCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RuntimeCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        "runtime"
    }

    fn collect(&self, _cancel: &CancellationToken, storage: &StorageController) -> Result<()> {
        storage.collect_counter("PollCount", 1);
        storage.collect_gauge("RandomValue", rand::thread_rng().gen::<f64>());
        Ok(())
    }
}
