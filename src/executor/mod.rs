//! Task executor
//!
//! The unit of work run by a worker process: resolve the descriptor's
//! cache and engine, execute the prediction under the soft/hard timeout
//! regime, persist the outcome, and decide whether a failure is worth a
//! redelivery.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheRegistry, HandleMetadata};
use crate::config::WorkerConfig;
use crate::engine::EngineRouter;
use crate::monitor::ResourceMonitor;
use crate::store::TaskStore;
use crate::task::{unix_now, QueuedTask, TaskResultRecord};
use crate::{Error, Result};

/// What happened to one delivery of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Terminal success; result record persisted
    Completed,
    /// Terminal failure; error record persisted
    Failed,
    /// Retryable failure; the task was re-enqueued with backoff
    Retrying {
        /// Attempt number the redelivery will carry
        next_attempt: u32,
    },
}

/// Executes one task delivery end to end.
pub struct TaskExecutor {
    store: Arc<dyn TaskStore>,
    registry: Arc<CacheRegistry>,
    router: Arc<EngineRouter>,
    monitor: Arc<ResourceMonitor>,
    config: WorkerConfig,
}

impl TaskExecutor {
    /// Wire an executor over its collaborators.
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<CacheRegistry>,
        router: Arc<EngineRouter>,
        monitor: Arc<ResourceMonitor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            router,
            monitor,
            config,
        }
    }

    /// Execute one delivery.
    ///
    /// Exactly two status writes happen per terminal delivery: entering
    /// `processing` and entering the terminal state. A retryable failure
    /// that still has budget leaves the status at `processing` - writing
    /// `failed` and then reprocessing would break status monotonicity for
    /// pollers - and re-enqueues the descriptor with the configured
    /// backoff.
    pub async fn execute(&self, task: &QueuedTask) -> TaskOutcome {
        let descriptor = &task.descriptor;
        info!(
            task_id = %descriptor.task_id,
            model_id = %descriptor.model_id,
            attempt = task.attempt,
            "processing inference task"
        );
        self.monitor.log_usage("before");
        let started = Instant::now();

        let outcome = match self.run_attempt(task).await {
            Ok(result) => {
                let processing_time = started.elapsed().as_secs_f64();
                let record = TaskResultRecord::Completed {
                    result,
                    processing_time,
                    model_id: descriptor.model_id.clone(),
                    model_format: descriptor.model_format,
                    completed_at: unix_now(),
                };
                if let Err(err) = self.store.complete(&descriptor.task_id, record) {
                    error!(task_id = %descriptor.task_id, %err, "failed to persist result");
                }
                info!(
                    task_id = %descriptor.task_id,
                    processing_time = format!("{processing_time:.2}s"),
                    "inference task completed"
                );
                TaskOutcome::Completed
            }
            Err(err) => {
                let next_attempt = task.attempt + 1;
                if err.is_retryable() && next_attempt < self.config.max_attempts {
                    warn!(
                        task_id = %descriptor.task_id,
                        attempt = task.attempt,
                        backoff_ms = self.config.retry_backoff_ms,
                        %err,
                        "attempt failed, re-enqueueing"
                    );
                    self.store.requeue_after(
                        QueuedTask {
                            descriptor: descriptor.clone(),
                            attempt: next_attempt,
                        },
                        self.config.retry_backoff(),
                    );
                    TaskOutcome::Retrying { next_attempt }
                } else {
                    error!(task_id = %descriptor.task_id, %err, "inference task failed");
                    if let Err(store_err) = self.store.fail(&descriptor.task_id, &err.to_string())
                    {
                        error!(task_id = %descriptor.task_id, %store_err, "failed to persist error");
                    }
                    TaskOutcome::Failed
                }
            }
        };

        self.monitor.log_usage("after");
        outcome
    }

    async fn run_attempt(&self, task: &QueuedTask) -> Result<Value> {
        let descriptor = &task.descriptor;
        self.store
            .set_processing(&descriptor.task_id, &descriptor.model_id)?;

        let cache = self
            .registry
            .resolve(descriptor.model_format)
            .ok_or_else(|| Error::UnknownFormat(descriptor.model_format.to_string()))?;
        let engine = self
            .router
            .resolve(descriptor.model_format, &descriptor.task_type);
        match &engine {
            Some(engine) => debug!(
                engine = engine.name(),
                format = %descriptor.model_format,
                task_type = %descriptor.task_type,
                "engine selected"
            ),
            None => debug!(
                format = %descriptor.model_format,
                task_type = %descriptor.task_type,
                "no engine claims pair, using cache-level predict"
            ),
        }

        let metadata = HandleMetadata {
            format: descriptor.model_format,
            task_type: descriptor.task_type.clone(),
        };
        let model_id = descriptor.model_id.clone();
        let location = descriptor.model_location.clone();
        let input = descriptor.input_data.clone();
        let params = descriptor.parameters.clone();

        // Model loads and predictions are CPU-bound; keep them off the
        // async workers.
        let join = tokio::task::spawn_blocking(move || {
            let handle = cache.get_model(&model_id, &location, metadata)?;
            match engine {
                Some(engine) => engine.process(&handle, &input, &params),
                None => cache.predict(&input, &params),
            }
        });

        self.await_with_timeouts(&descriptor.task_id, join).await
    }

    /// Await the execution under the two-stage timeout: past the soft
    /// limit the task keeps running with a warning; past the hard limit it
    /// is abandoned and fails with a timeout error. A blocking prediction
    /// cannot be forcibly killed, so abandonment means the result, if it
    /// ever arrives, is discarded.
    async fn await_with_timeouts(
        &self,
        task_id: &str,
        mut join: JoinHandle<Result<Value>>,
    ) -> Result<Value> {
        let soft = self.config.soft_timeout();
        let hard = self.config.hard_timeout();

        match tokio::time::timeout(soft, &mut join).await {
            Ok(res) => flatten_join(res),
            Err(_) => {
                warn!(
                    task_id,
                    soft_timeout_secs = soft.as_secs(),
                    "soft time limit exceeded, still running"
                );
                match tokio::time::timeout(hard.saturating_sub(soft), &mut join).await {
                    Ok(res) => flatten_join(res),
                    Err(_) => {
                        join.abort();
                        Err(Error::Timeout {
                            seconds: hard.as_secs(),
                            context: format!("task {task_id}"),
                        })
                    }
                }
            }
        }
    }
}

fn flatten_join(res: std::result::Result<Result<Value>, tokio::task::JoinError>) -> Result<Value> {
    res.map_err(|e| Error::inference(format!("execution aborted: {e}")))?
}
