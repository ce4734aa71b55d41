use crate::error::Result;
use pushmon_common::types::MetricBatch;

/// Crash-recovery backend for batches that could not be delivered before exit.
///
/// The agent calls [`DurableStore::load`] once on startup and
/// [`DurableStore::save`] when the final flush on shutdown fails. Saving an
/// empty batch clears whatever was stored before.
pub trait DurableStore: Send + Sync {
    fn save(&self, batch: &MetricBatch) -> Result<()>;

    /// Returns the last saved batch, or `None` if nothing (or only an empty
    /// batch) was saved.
    fn load(&self) -> Result<Option<MetricBatch>>;
}
