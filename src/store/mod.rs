//! Task queue and status store
//!
//! The at-least-once delivery substrate between the external API layer and
//! the worker pool: a list-shaped work queue plus TTL'd status and result
//! records keyed by task id. [`TaskStore`] is the seam; [`InMemoryStore`]
//! is the in-process implementation used by the worker binary and tests.
//! A broker-backed implementation satisfies the same contract.

mod memory;

pub use memory::InMemoryStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::task::{QueuedTask, TaskDescriptor, TaskLookup, TaskResultRecord, TaskStatusRecord};
use crate::Result;

/// Contract between the external layer, the queue, and the worker.
///
/// Status writes are monotonic: `pending -> processing -> {completed |
/// failed}`. Same-state rewrites are tolerated (redelivery marks
/// `processing` again); anything else is rejected. Terminal writes arm the
/// retention TTL, after which reads behave as if the task never existed.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Push a descriptor onto the work queue and atomically create its
    /// status record in `pending`.
    fn enqueue(&self, descriptor: TaskDescriptor) -> Result<()>;

    /// Redeliver a task after `delay` (retry backoff). The attempt counter
    /// on `task` is the caller's responsibility.
    fn requeue_after(&self, task: QueuedTask, delay: Duration);

    /// Pop the next ready task, waiting if the queue is empty.
    async fn dequeue(&self) -> QueuedTask;

    /// Mark a task `processing` and record which model it targets.
    fn set_processing(&self, task_id: &str, model_id: &str) -> Result<()>;

    /// Persist a terminal `completed` outcome.
    fn complete(&self, task_id: &str, record: TaskResultRecord) -> Result<()>;

    /// Persist a terminal `failed` outcome with a human-readable error.
    fn fail(&self, task_id: &str, error: &str) -> Result<()>;

    /// Current status record, or `None` if unknown/expired.
    fn get_status(&self, task_id: &str) -> Option<TaskStatusRecord>;

    /// Terminal outcome record, or `None` if not terminal yet or expired.
    fn get_result(&self, task_id: &str) -> Option<TaskResultRecord>;

    /// Combined poll response for the external layer.
    fn lookup(&self, task_id: &str) -> TaskLookup;

    /// Drop entries past their retention deadline; returns how many were
    /// removed. Reads already treat expired entries as absent, so this is
    /// purely a space reclamation pass.
    fn purge_expired(&self) -> usize;
}
