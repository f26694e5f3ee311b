use crate::alloc::TrackingAllocator;
use crate::catalog::{ALLOCATOR_GAUGES, PROCESS_GAUGES};
use crate::Collector;
use anyhow::{anyhow, Result};
use pulsemon_common::types::Metric;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Allocator and process statistics of the running agent.
pub struct RuntimeCollector {
    allocator: &'static TrackingAllocator,
    system: System,
    pid: Option<Pid>,
}

impl RuntimeCollector {
    pub fn new(allocator: &'static TrackingAllocator) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot resolve own pid, process metrics unavailable");
                None
            }
        };
        Self {
            allocator,
            system: System::new(),
            pid,
        }
    }
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        "runtime"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        let stats = self.allocator.stats();
        let allocator_values = [
            stats.live_bytes,
            stats.heap_bytes,
            stats.peak_bytes,
            stats.total_allocated,
            stats.total_freed,
            stats.mallocs,
            stats.frees,
            stats.reallocs,
            stats.zeroed_allocs,
            stats.live_objects(),
            stats.largest_alloc,
            stats.small_allocs,
            stats.medium_allocs,
            stats.large_allocs,
        ];

        let pid = self.pid.ok_or_else(|| anyhow!("own pid is unknown"))?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        let process = self
            .system
            .process(pid)
            .ok_or_else(|| anyhow!("process {pid} not found"))?;

        let disk = process.disk_usage();
        let threads = process.tasks().map(|t| t.len().max(1)).unwrap_or(1);
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let process_values = [
            process.memory() as f64,
            process.virtual_memory() as f64,
            f64::from(process.cpu_usage()),
            disk.read_bytes as f64,
            disk.written_bytes as f64,
            disk.total_read_bytes as f64,
            disk.total_written_bytes as f64,
            process.run_time() as f64,
            process.start_time() as f64,
            threads as f64,
            cpus as f64,
        ];

        let metrics = ALLOCATOR_GAUGES
            .iter()
            .zip(allocator_values.map(|v| v as f64))
            .chain(PROCESS_GAUGES.iter().zip(process_values))
            .map(|(name, value)| Metric::gauge(*name, value))
            .collect();
        Ok(metrics)
    }
}
