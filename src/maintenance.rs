//! Periodic maintenance: idle-eviction sweep and health probe
//!
//! Both jobs are idempotent and safe to overlap with task execution; the
//! sweep only ever touches models that have sat idle past the threshold,
//! and in-flight predictions pin their handles independently of the cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::cache::CacheRegistry;
use crate::monitor::{AcceleratorStats, HostStats, ResourceMonitor};
use crate::store::TaskStore;
use crate::task::{unix_now, ModelFormat};
use crate::worker::WorkerContext;

/// Overall worker health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Probe succeeded
    Healthy,
    /// Probe failed; see `error`
    Unhealthy,
}

/// One health probe report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Unix seconds when the probe ran
    pub timestamp: f64,
    /// Accelerator usage, when the probe succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerator: Option<AcceleratorStats>,
    /// Host usage, when the probe succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostStats>,
    /// Resident model id per registered format
    pub resident_models: BTreeMap<String, Option<String>>,
    /// The causing error, when unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Evict every idle resident model and reclaim expired store records.
/// Returns which models were unloaded, by format.
pub fn run_eviction_sweep(
    registry: &CacheRegistry,
    store: &dyn TaskStore,
) -> Vec<(ModelFormat, String)> {
    let evicted: Vec<(ModelFormat, String)> = registry
        .caches()
        .filter_map(|cache| cache.evict_if_idle().map(|id| (cache.format(), id)))
        .collect();

    for (format, model_id) in &evicted {
        info!(%format, model_id, "eviction sweep unloaded model");
    }
    let purged = store.purge_expired();
    if purged > 0 {
        info!(purged, "eviction sweep reclaimed expired records");
    }
    evicted
}

/// Gather a health report. Never fails: any internal error is folded into
/// an `unhealthy` report carrying the error message.
pub fn health_probe(monitor: &ResourceMonitor, registry: &CacheRegistry) -> HealthReport {
    let resident_models: BTreeMap<String, Option<String>> = registry
        .caches()
        .map(|cache| (cache.format().to_string(), cache.resident_model_id()))
        .collect();

    match monitor.snapshot() {
        Ok(snapshot) => HealthReport {
            status: HealthStatus::Healthy,
            timestamp: unix_now(),
            accelerator: Some(snapshot.accelerator),
            host: Some(snapshot.host),
            resident_models,
            error: None,
        },
        Err(err) => {
            error!(%err, "health probe failed");
            HealthReport {
                status: HealthStatus::Unhealthy,
                timestamp: unix_now(),
                accelerator: None,
                host: None,
                resident_models,
                error: Some(err.to_string()),
            }
        }
    }
}

/// Run both maintenance schedules until `shutdown` flips.
pub async fn run(ctx: Arc<WorkerContext>, mut shutdown: watch::Receiver<bool>) {
    let mut sweep = tokio::time::interval(std::time::Duration::from_secs(
        ctx.config.eviction_sweep_secs,
    ));
    let mut probe = tokio::time::interval(std::time::Duration::from_secs(
        ctx.config.health_probe_secs,
    ));
    // The first tick of an interval fires immediately; skip it so startup
    // does not look like a sweep.
    sweep.tick().await;
    probe.tick().await;

    loop {
        tokio::select! {
            _ = sweep.tick() => {
                let evicted = run_eviction_sweep(&ctx.registry, ctx.store.as_ref());
                info!(evicted = evicted.len(), "eviction sweep finished");
            }
            _ = probe.tick() => {
                let report = health_probe(&ctx.monitor, &ctx.registry);
                match report.status {
                    HealthStatus::Healthy => info!(
                        resident = ?report.resident_models,
                        "health probe: healthy"
                    ),
                    HealthStatus::Unhealthy => error!(
                        error = report.error.as_deref().unwrap_or("-"),
                        "health probe: unhealthy"
                    ),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
