use crate::Collector;
use anyhow::Result;
use rtmon_common::Metric;
use sysinfo::System;

pub const TOTAL_MEMORY: &str = "TotalMemory";
pub const FREE_MEMORY: &str = "FreeMemory";
pub const CPU_UTILIZATION: &str = "CPUutilization1";

/// Host memory and CPU summary, written under three fixed gauge keys.
pub struct HostCollector {
    system: System,
}

impl HostCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for HostCollector {
    fn name(&self) -> &str {
        "host"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_memory();
        self.system.refresh_cpu_all();

        Ok(vec![
            Metric::gauge(TOTAL_MEMORY, self.system.total_memory() as f64),
            Metric::gauge(FREE_MEMORY, self.system.free_memory() as f64),
            Metric::gauge(CPU_UTILIZATION, f64::from(self.system.global_cpu_usage())),
        ])
    }
}
