//! Store contract: delivery order, status monotonicity, retention TTL

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;

use mlserve_worker::store::{InMemoryStore, TaskStore};
use mlserve_worker::task::{
    unix_now, ModelFormat, QueuedTask, TaskDescriptor, TaskLookup, TaskResultRecord, TaskStatus,
};

fn descriptor(task_id: &str) -> TaskDescriptor {
    TaskDescriptor {
        task_id: task_id.to_string(),
        model_id: "m-1".into(),
        model_location: PathBuf::from("/models/m-1.json"),
        model_format: ModelFormat::ClassicalMl,
        task_type: "classification".into(),
        input_data: json!({"data": [[1.0, 2.0]]}),
        parameters: Default::default(),
    }
}

fn completed_record() -> TaskResultRecord {
    TaskResultRecord::Completed {
        result: json!({"predictions": [1]}),
        processing_time: 0.01,
        model_id: "m-1".into(),
        model_format: ModelFormat::ClassicalMl,
        completed_at: unix_now(),
    }
}

#[tokio::test]
async fn test_fifo_delivery_order() {
    let store = InMemoryStore::new(Duration::from_secs(60));
    store.enqueue(descriptor("t-1")).unwrap();
    store.enqueue(descriptor("t-2")).unwrap();
    store.enqueue(descriptor("t-3")).unwrap();

    for expected in ["t-1", "t-2", "t-3"] {
        let task = store.dequeue().await;
        assert_eq!(task.descriptor.task_id, expected);
        assert_eq!(task.attempt, 0);
    }
    assert_eq!(store.queue_depth(), 0);
}

#[tokio::test]
async fn test_status_lifecycle_is_monotonic() {
    let store = InMemoryStore::new(Duration::from_secs(60));
    store.enqueue(descriptor("t-1")).unwrap();
    assert!(matches!(store.lookup("t-1"), TaskLookup::Pending));

    store.set_processing("t-1", "m-1").unwrap();
    let status = store.get_status("t-1").unwrap();
    assert_eq!(status.status, TaskStatus::Processing);
    assert_eq!(status.model_id.as_deref(), Some("m-1"));
    assert!(status.started_at.is_some());
    assert!(status.completed_at.is_none());

    // Same-state rewrite is fine (redelivery marks processing again).
    store.set_processing("t-1", "m-1").unwrap();

    store.complete("t-1", completed_record()).unwrap();
    let status = store.get_status("t-1").unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    assert!(status.completed_at.is_some());

    // Terminal is terminal.
    assert!(store.set_processing("t-1", "m-1").is_err());
    assert!(store.fail("t-1", "late failure").is_err());

    match store.lookup("t-1") {
        TaskLookup::Completed {
            result,
            elapsed_time,
        } => {
            assert_eq!(result["predictions"], json!([1]));
            assert!(elapsed_time > 0.0);
        }
        other => panic!("unexpected lookup: {other:?}"),
    }
}

#[tokio::test]
async fn test_records_expire_after_ttl() {
    let store = InMemoryStore::new(Duration::from_millis(40));
    store.enqueue(descriptor("t-1")).unwrap();
    store.set_processing("t-1", "m-1").unwrap();
    store.complete("t-1", completed_record()).unwrap();

    assert!(store.get_status("t-1").is_some());
    assert!(store.get_result("t-1").is_some());

    tokio::time::sleep(Duration::from_millis(60)).await;

    // Expired entries read as absent even before the purge runs.
    assert!(store.get_status("t-1").is_none());
    assert!(store.get_result("t-1").is_none());
    assert!(matches!(store.lookup("t-1"), TaskLookup::NotFound));

    assert_eq!(store.purge_expired(), 2);
    assert_eq!(store.purge_expired(), 0);
}

#[tokio::test]
async fn test_terminal_write_rearms_ttl() {
    let store = InMemoryStore::new(Duration::from_millis(80));
    store.enqueue(descriptor("t-1")).unwrap();

    // Old enough that the enqueue-time deadline is nearly spent.
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.set_processing("t-1", "m-1").unwrap();
    store.complete("t-1", completed_record()).unwrap();

    // The terminal write armed a fresh window.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(store.lookup("t-1"), TaskLookup::Completed { .. }));
}

#[tokio::test]
async fn test_requeue_after_delays_redelivery() {
    let store = InMemoryStore::new(Duration::from_secs(60));
    store.enqueue(descriptor("t-1")).unwrap();
    let task = store.dequeue().await;

    let started = std::time::Instant::now();
    store.requeue_after(
        QueuedTask {
            descriptor: task.descriptor,
            attempt: 1,
        },
        Duration::from_millis(50),
    );

    let redelivered = store.dequeue().await;
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(redelivered.descriptor.task_id, "t-1");
    assert_eq!(redelivered.attempt, 1);
}
