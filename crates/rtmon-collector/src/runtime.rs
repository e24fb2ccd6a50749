use crate::Collector;
use anyhow::Result;
use rtmon_common::Metric;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// One sample of process and host statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeStats {
    pub process_memory: u64,
    pub process_virtual_memory: u64,
    pub process_cpu_usage: f32,
    pub process_run_time: u64,
    pub process_disk_read_bytes: u64,
    pub process_disk_written_bytes: u64,
    pub used_memory: u64,
    pub available_memory: u64,
    pub used_swap: u64,
    pub free_swap: u64,
    pub load_average_1: f64,
    pub load_average_5: f64,
    pub load_average_15: f64,
    pub uptime: u64,
    pub cpu_count: usize,
}

/// Named numeric field of [`RuntimeStats`].
///
/// # Examples
///
/// ```
/// use rtmon_collector::RuntimeField;
///
/// assert_eq!(RuntimeField::from_name("UsedSwap"), Some(RuntimeField::UsedSwap));
/// assert_eq!(RuntimeField::from_name("HeapAlloc"), None);
/// assert_eq!(RuntimeField::CpuCount.name(), "CpuCount");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeField {
    ProcessMemory,
    ProcessVirtualMemory,
    ProcessCpuUsage,
    ProcessRunTime,
    ProcessDiskReadBytes,
    ProcessDiskWrittenBytes,
    UsedMemory,
    AvailableMemory,
    UsedSwap,
    FreeSwap,
    LoadAverage1,
    LoadAverage5,
    LoadAverage15,
    Uptime,
    CpuCount,
}

impl RuntimeField {
    pub const ALL: [RuntimeField; 15] = [
        RuntimeField::ProcessMemory,
        RuntimeField::ProcessVirtualMemory,
        RuntimeField::ProcessCpuUsage,
        RuntimeField::ProcessRunTime,
        RuntimeField::ProcessDiskReadBytes,
        RuntimeField::ProcessDiskWrittenBytes,
        RuntimeField::UsedMemory,
        RuntimeField::AvailableMemory,
        RuntimeField::UsedSwap,
        RuntimeField::FreeSwap,
        RuntimeField::LoadAverage1,
        RuntimeField::LoadAverage5,
        RuntimeField::LoadAverage15,
        RuntimeField::Uptime,
        RuntimeField::CpuCount,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RuntimeField::ProcessMemory => "ProcessMemory",
            RuntimeField::ProcessVirtualMemory => "ProcessVirtualMemory",
            RuntimeField::ProcessCpuUsage => "ProcessCpuUsage",
            RuntimeField::ProcessRunTime => "ProcessRunTime",
            RuntimeField::ProcessDiskReadBytes => "ProcessDiskReadBytes",
            RuntimeField::ProcessDiskWrittenBytes => "ProcessDiskWrittenBytes",
            RuntimeField::UsedMemory => "UsedMemory",
            RuntimeField::AvailableMemory => "AvailableMemory",
            RuntimeField::UsedSwap => "UsedSwap",
            RuntimeField::FreeSwap => "FreeSwap",
            RuntimeField::LoadAverage1 => "LoadAverage1",
            RuntimeField::LoadAverage5 => "LoadAverage5",
            RuntimeField::LoadAverage15 => "LoadAverage15",
            RuntimeField::Uptime => "Uptime",
            RuntimeField::CpuCount => "CpuCount",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    pub fn read(&self, s: &RuntimeStats) -> f64 {
        match self {
            RuntimeField::ProcessMemory => s.process_memory as f64,
            RuntimeField::ProcessVirtualMemory => s.process_virtual_memory as f64,
            RuntimeField::ProcessCpuUsage => f64::from(s.process_cpu_usage),
            RuntimeField::ProcessRunTime => s.process_run_time as f64,
            RuntimeField::ProcessDiskReadBytes => s.process_disk_read_bytes as f64,
            RuntimeField::ProcessDiskWrittenBytes => s.process_disk_written_bytes as f64,
            RuntimeField::UsedMemory => s.used_memory as f64,
            RuntimeField::AvailableMemory => s.available_memory as f64,
            RuntimeField::UsedSwap => s.used_swap as f64,
            RuntimeField::FreeSwap => s.free_swap as f64,
            RuntimeField::LoadAverage1 => s.load_average_1,
            RuntimeField::LoadAverage5 => s.load_average_5,
            RuntimeField::LoadAverage15 => s.load_average_15,
            RuntimeField::Uptime => s.uptime as f64,
            RuntimeField::CpuCount => s.cpu_count as f64,
        }
    }
}

/// Resolves configured names into fields, dropping (and logging) unknown ones.
pub fn resolve_fields<S: AsRef<str>>(names: &[S]) -> Vec<RuntimeField> {
    let mut fields = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        match RuntimeField::from_name(name) {
            Some(f) if !fields.contains(&f) => fields.push(f),
            Some(_) => {}
            None => tracing::warn!(metric = name, "Unknown runtime metric, skipped"),
        }
    }
    fields
}

/// Samples the configured [`RuntimeField`]s for the agent's own process and
/// its host.
pub struct RuntimeCollector {
    system: System,
    pid: Option<Pid>,
    fields: Vec<RuntimeField>,
}

impl RuntimeCollector {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = e, "Cannot determine own pid, process fields read as 0");
                None
            }
        };
        let mut system = System::new();
        system.refresh_cpu_all();
        Self {
            system,
            pid,
            fields: resolve_fields(names),
        }
    }

    pub fn fields(&self) -> &[RuntimeField] {
        &self.fields
    }

    pub fn sample(&mut self) -> RuntimeStats {
        self.system.refresh_memory();
        self.system.refresh_cpu_all();
        let mut stats = RuntimeStats {
            used_memory: self.system.used_memory(),
            available_memory: self.system.available_memory(),
            used_swap: self.system.used_swap(),
            free_swap: self.system.free_swap(),
            uptime: System::uptime(),
            cpu_count: self.system.cpus().len(),
            ..RuntimeStats::default()
        };
        let load = System::load_average();
        stats.load_average_1 = load.one;
        stats.load_average_5 = load.five;
        stats.load_average_15 = load.fifteen;

        if let Some(pid) = self.pid {
            self.system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = self.system.process(pid) {
                let disk = process.disk_usage();
                stats.process_memory = process.memory();
                stats.process_virtual_memory = process.virtual_memory();
                stats.process_cpu_usage = process.cpu_usage();
                stats.process_run_time = process.run_time();
                stats.process_disk_read_bytes = disk.total_read_bytes;
                stats.process_disk_written_bytes = disk.total_written_bytes;
            }
        }
        stats
    }
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        "runtime"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        let stats = self.sample();
        Ok(self
            .fields
            .iter()
            .map(|f| Metric::gauge(f.name(), f.read(&stats)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_field_name_round_trips() {
        for f in RuntimeField::ALL {
            assert_eq!(RuntimeField::from_name(f.name()), Some(f));
        }
    }

    #[test]
    fn unknown_and_duplicate_names_are_dropped_once() {
        let fields = resolve_fields(&["UsedMemory", "Frees", "UsedMemory", "CpuCount"]);
        assert_eq!(fields, vec![RuntimeField::UsedMemory, RuntimeField::CpuCount]);
    }

    #[test]
    fn read_picks_the_named_field() {
        let stats = RuntimeStats {
            used_swap: 42,
            load_average_5: 0.75,
            cpu_count: 8,
            ..RuntimeStats::default()
        };
        assert_eq!(RuntimeField::UsedSwap.read(&stats), 42.0);
        assert_eq!(RuntimeField::LoadAverage5.read(&stats), 0.75);
        assert_eq!(RuntimeField::CpuCount.read(&stats), 8.0);
    }

    #[test]
    fn collect_emits_one_gauge_per_resolved_field() {
        let mut collector = RuntimeCollector::new(&["CpuCount", "Uptime", "Bogus"]);
        let metrics = collector.collect().unwrap();
        let ids: Vec<_> = metrics.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["CpuCount", "Uptime"]);
        assert!(metrics.iter().all(|m| m.validate().is_ok()));
        assert!(metrics[0].value.unwrap() >= 1.0);
    }
}
