//! # System Metrics Collector
//!
//! Samples the exporter's own CPU and resident memory through `sysinfo` and
//! publishes them as gauges in the exporter's registry, so a slow or leaking
//! exporter shows up next to the cluster metrics it serves.

use prometheus::{Gauge, Registry};
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::sync::watch;
use tokio::time;
use tracing::{error, info};

const SYSTEM_METRICS_COLLECTION_INTERVAL: Duration = Duration::from_secs(10);

/// A collector for the exporter's process metrics.
pub struct SystemCollector {
    system: System,
    cpu_usage: Gauge,
    memory_usage: Gauge,
}

impl SystemCollector {
    /// Creates the process gauges and registers them in `registry`.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let cpu_usage = Gauge::new(
            "process_cpu_usage_percent",
            "The percentage of CPU time the exporter process is currently using.",
        )?;
        let memory_usage = Gauge::new(
            "process_memory_usage_bytes",
            "The resident set size of the exporter process, in bytes.",
        )?;
        registry.register(Box::new(cpu_usage.clone()))?;
        registry.register(Box::new(memory_usage.clone()))?;

        Ok(Self {
            system: System::new(),
            cpu_usage,
            memory_usage,
        })
    }

    /// Runs the collection loop until `shutdown_rx` fires.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(e) => {
                error!("Failed to get current PID: {}", e);
                return;
            }
        };

        let mut interval = time::interval(SYSTEM_METRICS_COLLECTION_INTERVAL);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("System metrics collector received shutdown signal.");
                    break;
                }
                _ = interval.tick() => {
                    if !self.sample(pid) {
                        error!(%pid, "Exporter process no longer found. System metrics collector is shutting down.");
                        break;
                    }
                }
            }
        }
    }

    /// Refreshes and publishes the process gauges; `false` when the process
    /// has disappeared.
    fn sample(&mut self, pid: Pid) -> bool {
        self.system.refresh_cpu();
        if !self.system.refresh_process(pid) {
            return false;
        }
        if let Some(process) = self.system.process(pid) {
            self.cpu_usage.set(process.cpu_usage() as f64);
            self.memory_usage.set(process.memory() as f64);
        }
        true
    }
}
