//! Resource monitor
//!
//! Stateless, on-demand snapshots of accelerator and host usage. Consumed
//! around each task execution and by the health probe; never cached.
//!
//! Accelerator stats come through the [`AcceleratorProbe`] seam so deploys
//! without a device (and unit tests) get a zeroed, `available: false`
//! snapshot instead of a failure.

use std::sync::Arc;

use serde::Serialize;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};
use tracing::info;

use crate::Result;

const GIB: f64 = 1e9;

/// Accelerator-side usage snapshot. Zeroed when no accelerator is present.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AcceleratorStats {
    /// Whether an accelerator device is present
    pub available: bool,
    /// Number of devices
    pub device_count: u32,
    /// Device name, when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Memory currently allocated, GB
    pub memory_allocated_gb: f64,
    /// Memory reserved by the runtime, GB
    pub memory_reserved_gb: f64,
    /// Total device memory, GB
    pub memory_total_gb: f64,
}

/// Host-side usage snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HostStats {
    /// CPU usage percent across all cores
    pub cpu_percent: f32,
    /// Number of logical cores
    pub cpu_count: usize,
    /// Memory usage percent
    pub memory_percent: f32,
    /// Available memory, GB
    pub memory_available_gb: f64,
    /// Total memory, GB
    pub memory_total_gb: f64,
    /// Usage percent of the fullest mounted disk
    pub disk_percent: f32,
}

/// One combined snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    /// Accelerator usage
    pub accelerator: AcceleratorStats,
    /// Host usage
    pub host: HostStats,
}

/// Source of accelerator stats.
pub trait AcceleratorProbe: Send + Sync {
    /// Current device stats.
    fn stats(&self) -> AcceleratorStats;
}

/// Probe for deploys without an accelerator: reports an unavailable,
/// zeroed device.
pub struct NoAccelerator;

impl AcceleratorProbe for NoAccelerator {
    fn stats(&self) -> AcceleratorStats {
        AcceleratorStats::default()
    }
}

/// Stateless resource monitor.
pub struct ResourceMonitor {
    probe: Arc<dyn AcceleratorProbe>,
}

impl ResourceMonitor {
    /// A monitor over the given accelerator probe.
    pub fn new(probe: Arc<dyn AcceleratorProbe>) -> Self {
        Self { probe }
    }

    /// Take a fresh snapshot.
    pub fn snapshot(&self) -> Result<ResourceSnapshot> {
        let mut sys = System::new_with_specifics(
            RefreshKind::new()
                .with_memory(MemoryRefreshKind::everything())
                .with_cpu(CpuRefreshKind::everything()),
        );
        sys.refresh_memory();
        sys.refresh_cpu_usage();

        let total = sys.total_memory() as f64;
        let available = sys.available_memory() as f64;
        let memory_percent = if total > 0.0 {
            ((total - available) / total * 100.0) as f32
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_percent = disks
            .list()
            .iter()
            .filter(|disk| disk.total_space() > 0)
            .map(|disk| {
                let total = disk.total_space() as f64;
                let used = total - disk.available_space() as f64;
                (used / total * 100.0) as f32
            })
            .fold(0.0f32, f32::max);

        Ok(ResourceSnapshot {
            accelerator: self.probe.stats(),
            host: HostStats {
                cpu_percent: sys.global_cpu_info().cpu_usage(),
                cpu_count: num_cpus::get(),
                memory_percent,
                memory_available_gb: available / GIB,
                memory_total_gb: total / GIB,
                disk_percent,
            },
        })
    }

    /// Log current usage at info level, tagged with the execution stage.
    pub fn log_usage(&self, stage: &str) {
        match self.snapshot() {
            Ok(snapshot) => info!(
                stage,
                accelerator_available = snapshot.accelerator.available,
                accelerator_mem_gb = format!(
                    "{:.2}/{:.2}",
                    snapshot.accelerator.memory_allocated_gb,
                    snapshot.accelerator.memory_total_gb
                ),
                cpu_percent = format!("{:.1}", snapshot.host.cpu_percent),
                memory_percent = format!("{:.1}", snapshot.host.memory_percent),
                "resource usage"
            ),
            Err(err) => info!(stage, %err, "resource snapshot unavailable"),
        }
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(Arc::new(NoAccelerator))
    }
}
