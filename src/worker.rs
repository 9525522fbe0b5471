//! Worker context and pull loop
//!
//! A [`WorkerContext`] owns every collaborator a worker process needs -
//! store, cache registry, engine router, monitor, executor - wired at
//! construction. Nothing here is a process-wide global: tests build
//! contexts around fakes and temp-dir artifacts freely.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::cache::CacheRegistry;
use crate::config::WorkerConfig;
use crate::engine::EngineRouter;
use crate::executor::TaskExecutor;
use crate::monitor::ResourceMonitor;
use crate::store::{InMemoryStore, TaskStore};

/// Everything one worker process holds.
pub struct WorkerContext {
    /// Worker configuration
    pub config: WorkerConfig,
    /// Task queue and status store
    pub store: Arc<dyn TaskStore>,
    /// Model handle caches, one per format
    pub registry: Arc<CacheRegistry>,
    /// Engine router
    pub router: Arc<EngineRouter>,
    /// Resource monitor
    pub monitor: Arc<ResourceMonitor>,
    /// Task executor
    pub executor: TaskExecutor,
}

impl WorkerContext {
    /// Build a context with the default in-memory store, the three
    /// built-in format caches, and the built-in engines.
    pub fn new(config: WorkerConfig) -> Arc<Self> {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryStore::new(config.result_ttl()));
        Self::with_store(config, store)
    }

    /// Build a context around an externally owned store (shared with the
    /// enqueueing side, or a fake in tests).
    pub fn with_store(config: WorkerConfig, store: Arc<dyn TaskStore>) -> Arc<Self> {
        let registry = Arc::new(CacheRegistry::with_defaults(config.max_idle()));
        let router = Arc::new(EngineRouter::with_defaults());
        let monitor = Arc::new(ResourceMonitor::default());
        Self::with_parts(config, store, registry, router, monitor)
    }

    /// Build a context from explicit parts.
    pub fn with_parts(
        config: WorkerConfig,
        store: Arc<dyn TaskStore>,
        registry: Arc<CacheRegistry>,
        router: Arc<EngineRouter>,
        monitor: Arc<ResourceMonitor>,
    ) -> Arc<Self> {
        let executor = TaskExecutor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&router),
            Arc::clone(&monitor),
            config.clone(),
        );
        info!("worker context initialized");
        Arc::new(Self {
            config,
            store,
            registry,
            router,
            monitor,
            executor,
        })
    }

    /// Release every resident model. Called once at process shutdown.
    pub fn shutdown(&self) {
        let unloaded = self.registry.unload_all();
        info!(unloaded, "worker context shut down");
    }
}

/// The pull loop: one task in flight at a time.
///
/// A task is acknowledged implicitly by the loop returning to `dequeue`
/// only after its outcome is persisted, giving at-least-once delivery: a
/// crash mid-task leaves the descriptor eligible for redelivery, and a
/// task may in principle execute twice.
pub struct Worker {
    ctx: Arc<WorkerContext>,
}

impl Worker {
    /// A worker over the given context.
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    /// Pull and execute tasks until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("worker loop started");
        loop {
            tokio::select! {
                task = self.ctx.store.dequeue() => {
                    self.ctx.executor.execute(&task).await;
                }
                _ = shutdown.changed() => break,
            }
        }
        self.ctx.shutdown();
        info!("worker loop stopped");
    }
}
