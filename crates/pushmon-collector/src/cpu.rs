use crate::Collector;
use anyhow::Result;
use pushmon_storage::StorageController;
use std::sync::{Mutex, PoisonError};
use sysinfo::System;
use tokio_util::sync::CancellationToken;

pub struct CpuCollector {
    system: Mutex<System>,
}

impl CpuCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        // Usage is computed between two refreshes; prime the first one.
        system.refresh_cpu_all();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn collect(&self, cancel: &CancellationToken, storage: &StorageController) -> Result<()> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu_all();

        storage.collect_gauge("cpu.usage", f64::from(system.global_cpu_usage()));

        for (i, cpu) in system.cpus().iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            storage.collect_gauge(&format!("cpu.core_usage.{i}"), f64::from(cpu.cpu_usage()));
        }

        Ok(())
    }
}
