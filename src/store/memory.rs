//! In-process task queue and TTL'd record tables

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::task::{
    unix_now, QueuedTask, TaskDescriptor, TaskLookup, TaskResultRecord, TaskStatus,
    TaskStatusRecord,
};
use crate::{Error, Result};

use super::TaskStore;

/// A stored value with a retention deadline.
struct Expiring<T> {
    value: T,
    deadline: Instant,
}

impl<T: Clone> Expiring<T> {
    fn live_value(&self) -> Option<T> {
        if Instant::now() < self.deadline {
            Some(self.value.clone())
        } else {
            None
        }
    }
}

struct Inner {
    queue: Mutex<VecDeque<QueuedTask>>,
    notify: Notify,
    statuses: DashMap<String, Expiring<TaskStatusRecord>>,
    results: DashMap<String, Expiring<TaskResultRecord>>,
    ttl: Duration,
}

/// In-memory [`TaskStore`].
///
/// Every record write refreshes the retention deadline; the deadline armed
/// by the terminal write is the one that outlives the task. Expired entries
/// read as absent immediately; [`TaskStore::purge_expired`] reclaims their
/// space on the maintenance schedule.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    /// Create a store with the given retention window for status/result
    /// records.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                statuses: DashMap::new(),
                results: DashMap::new(),
                ttl,
            }),
        }
    }

    /// Number of tasks currently waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().len()
    }

    fn put_status(&self, task_id: &str, record: TaskStatusRecord) {
        self.inner.statuses.insert(
            task_id.to_string(),
            Expiring {
                value: record,
                deadline: Instant::now() + self.inner.ttl,
            },
        );
    }

    fn push(&self, task: QueuedTask) {
        self.inner.queue.lock().push_back(task);
        self.inner.notify.notify_one();
    }

    /// Apply a monotonic status transition. Creates the record if absent
    /// (a task can be redelivered after its previous records expired).
    fn transition(
        &self,
        task_id: &str,
        next: TaskStatus,
        update: impl FnOnce(&mut TaskStatusRecord),
    ) -> Result<()> {
        let mut record = match self.get_status(task_id) {
            Some(existing) => {
                if !existing.status.can_transition_to(next) {
                    return Err(Error::Store(format!(
                        "invalid status transition {} -> {} for task {}",
                        existing.status, next, task_id
                    )));
                }
                existing
            }
            None => TaskStatusRecord::pending(),
        };
        record.status = next;
        update(&mut record);
        self.put_status(task_id, record);
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    fn enqueue(&self, descriptor: TaskDescriptor) -> Result<()> {
        let task_id = descriptor.task_id.clone();
        self.put_status(&task_id, TaskStatusRecord::pending());
        self.push(QueuedTask {
            descriptor,
            attempt: 0,
        });
        debug!(task_id = %task_id, "task enqueued");
        Ok(())
    }

    fn requeue_after(&self, task: QueuedTask, delay: Duration) {
        let store = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(
                task_id = %task.descriptor.task_id,
                attempt = task.attempt,
                "task redelivered after backoff"
            );
            store.push(task);
        });
    }

    async fn dequeue(&self) -> QueuedTask {
        loop {
            // Register for wakeup before checking, so a push between the
            // check and the await is not lost.
            let notified = self.inner.notify.notified();
            if let Some(task) = self.inner.queue.lock().pop_front() {
                return task;
            }
            notified.await;
        }
    }

    fn set_processing(&self, task_id: &str, model_id: &str) -> Result<()> {
        self.transition(task_id, TaskStatus::Processing, |record| {
            record.model_id = Some(model_id.to_string());
            if record.started_at.is_none() {
                record.started_at = Some(unix_now());
            }
        })
    }

    fn complete(&self, task_id: &str, record: TaskResultRecord) -> Result<()> {
        self.transition(task_id, TaskStatus::Completed, |status| {
            status.completed_at = Some(unix_now());
        })?;
        self.inner.results.insert(
            task_id.to_string(),
            Expiring {
                value: record,
                deadline: Instant::now() + self.inner.ttl,
            },
        );
        Ok(())
    }

    fn fail(&self, task_id: &str, error: &str) -> Result<()> {
        self.transition(task_id, TaskStatus::Failed, |status| {
            status.completed_at = Some(unix_now());
        })?;
        self.inner.results.insert(
            task_id.to_string(),
            Expiring {
                value: TaskResultRecord::Failed {
                    error: error.to_string(),
                    failed_at: unix_now(),
                },
                deadline: Instant::now() + self.inner.ttl,
            },
        );
        Ok(())
    }

    fn get_status(&self, task_id: &str) -> Option<TaskStatusRecord> {
        self.inner
            .statuses
            .get(task_id)
            .and_then(|entry| entry.live_value())
    }

    fn get_result(&self, task_id: &str) -> Option<TaskResultRecord> {
        self.inner
            .results
            .get(task_id)
            .and_then(|entry| entry.live_value())
    }

    fn lookup(&self, task_id: &str) -> TaskLookup {
        let Some(status) = self.get_status(task_id) else {
            return TaskLookup::NotFound;
        };
        match status.status {
            TaskStatus::Pending => TaskLookup::Pending,
            TaskStatus::Processing => TaskLookup::Processing,
            TaskStatus::Completed | TaskStatus::Failed => match self.get_result(task_id) {
                Some(TaskResultRecord::Completed {
                    result,
                    processing_time,
                    ..
                }) => TaskLookup::Completed {
                    result,
                    elapsed_time: processing_time,
                },
                Some(TaskResultRecord::Failed { error, .. }) => TaskLookup::Failed { error },
                // Status outlived the result record; treat as unknown.
                None => TaskLookup::NotFound,
            },
        }
    }

    fn purge_expired(&self) -> usize {
        // Counted per removal: concurrent writers may grow the maps while
        // the sweep runs, so a before/after length delta is unreliable.
        let now = Instant::now();
        let mut removed = 0usize;
        self.inner.statuses.retain(|_, entry| {
            let live = entry.deadline > now;
            removed += usize::from(!live);
            live
        });
        self.inner.results.retain(|_, entry| {
            let live = entry.deadline > now;
            removed += usize::from(!live);
            live
        });
        removed
    }
}
