use crate::Collector;
use anyhow::Result;
use pushmon_storage::StorageController;
use std::sync::{Mutex, PoisonError};
use sysinfo::System;
use tokio_util::sync::CancellationToken;

pub struct MemoryCollector {
    system: Mutex<System>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "memory"
    }

    fn collect(&self, _cancel: &CancellationToken, storage: &StorageController) -> Result<()> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();

        let total = system.total_memory();
        let used = system.used_memory();
        storage.collect_gauge("memory.total", total as f64);
        storage.collect_gauge("memory.used", used as f64);
        storage.collect_gauge("memory.available", system.available_memory() as f64);
        storage.collect_gauge("memory.used_percent", percent(used, total));

        // Swap
        let swap_total = system.total_swap();
        let swap_used = system.used_swap();
        storage.collect_gauge("memory.swap_total", swap_total as f64);
        storage.collect_gauge("memory.swap_used", swap_used as f64);
        storage.collect_gauge("memory.swap_percent", percent(swap_used, swap_total));

        Ok(())
    }
}
