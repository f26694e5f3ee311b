use crate::catalog::{CPU_UTILIZATION_PREFIX, HOST_GAUGES};
use crate::Collector;
use anyhow::Result;
use pulsemon_common::types::Metric;
use sysinfo::System;

/// Host-wide memory and per-core CPU utilization.
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

        let [total, free] = HOST_GAUGES;
        let mut metrics = vec![
            Metric::gauge(total, self.system.total_memory() as f64),
            Metric::gauge(free, self.system.free_memory() as f64),
        ];
        for (i, cpu) in self.system.cpus().iter().enumerate() {
            metrics.push(Metric::gauge(
                format!("{CPU_UTILIZATION_PREFIX}{i}"),
                f64::from(cpu.cpu_usage()),
            ));
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_memory_and_each_core() {
        let mut collector = HostCollector::new();
        let metrics = collector.collect().unwrap();
        assert_eq!(metrics[0].id, "TotalMemory");
        assert_eq!(metrics[1].id, "FreeMemory");
        assert!(metrics.len() > 2);
        assert_eq!(metrics[2].id, "CPUutilization0");
    }
}
