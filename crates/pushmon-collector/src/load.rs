use crate::Collector;
use anyhow::Result;
use pushmon_storage::StorageController;
use sysinfo::System;
use tokio_util::sync::CancellationToken;

pub struct LoadCollector;

impl LoadCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for LoadCollector {
    fn name(&self) -> &str {
        "load"
    }

    fn collect(&self, _cancel: &CancellationToken, storage: &StorageController) -> Result<()> {
        let load_avg = System::load_average();
        storage.collect_gauge("system.load_1", load_avg.one);
        storage.collect_gauge("system.load_5", load_avg.five);
        storage.collect_gauge("system.load_15", load_avg.fifteen);
        storage.collect_gauge("system.uptime", System::uptime() as f64);
        Ok(())
    }
}
