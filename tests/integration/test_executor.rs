//! Executor outcomes: retry budget, fail-fast failures, timeouts

use std::io::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};

use mlserve_worker::cache::{CacheRegistry, FormatBackend, HandleMetadata, LoadedModel, ModelCache};
use mlserve_worker::config::WorkerConfig;
use mlserve_worker::engine::EngineRouter;
use mlserve_worker::executor::{TaskExecutor, TaskOutcome};
use mlserve_worker::monitor::ResourceMonitor;
use mlserve_worker::store::{InMemoryStore, TaskStore};
use mlserve_worker::task::{ModelFormat, TaskDescriptor, TaskLookup, TaskStatus};
use mlserve_worker::{Error, Result};

/// Backend whose loads always hit a transient resource failure.
struct ExhaustedBackend {
    attempts: Arc<AtomicUsize>,
}

impl FormatBackend for ExhaustedBackend {
    fn format(&self) -> ModelFormat {
        ModelFormat::ClassicalMl
    }

    fn load(&self, _location: &Path, _metadata: &HandleMetadata) -> Result<Box<dyn LoadedModel>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::ResourceExhausted(
            "accelerator memory unavailable".into(),
        ))
    }
}

/// Backend whose model blocks well past the hard time limit.
struct StallingBackend;

struct StallingModel;

impl LoadedModel for StallingModel {
    fn predict(&self, _input: &Value, _params: &Map<String, Value>) -> Result<Value> {
        std::thread::sleep(Duration::from_secs(5));
        Ok(json!({"predictions": []}))
    }
}

impl FormatBackend for StallingBackend {
    fn format(&self) -> ModelFormat {
        ModelFormat::ClassicalMl
    }

    fn load(&self, _location: &Path, _metadata: &HandleMetadata) -> Result<Box<dyn LoadedModel>> {
        Ok(Box::new(StallingModel))
    }
}

fn descriptor(task_id: &str, format: ModelFormat, location: &Path) -> TaskDescriptor {
    TaskDescriptor {
        task_id: task_id.to_string(),
        model_id: "m-1".into(),
        model_location: location.to_path_buf(),
        model_format: format,
        task_type: "classification".into(),
        input_data: json!({"data": [[1.0, 2.0]]}),
        parameters: Default::default(),
    }
}

fn executor(store: &InMemoryStore, registry: CacheRegistry, config: WorkerConfig) -> TaskExecutor {
    TaskExecutor::new(
        Arc::new(store.clone()),
        Arc::new(registry),
        Arc::new(EngineRouter::with_defaults()),
        Arc::new(ResourceMonitor::default()),
        config,
    )
}

#[tokio::test]
async fn test_retryable_failure_exhausts_attempt_budget() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut registry = CacheRegistry::new();
    registry.register(ModelCache::new(
        Box::new(ExhaustedBackend {
            attempts: Arc::clone(&attempts),
        }),
        Duration::from_secs(1800),
    ));

    let config = WorkerConfig {
        max_attempts: 3,
        retry_backoff_ms: 50,
        ..WorkerConfig::default()
    };
    let store = InMemoryStore::new(Duration::from_secs(60));
    let executor = executor(&store, registry, config);

    store
        .enqueue(descriptor(
            "t-1",
            ModelFormat::ClassicalMl,
            Path::new("/models/m-1.json"),
        ))
        .unwrap();

    let started = Instant::now();
    let mut outcomes = Vec::new();
    loop {
        let task = store.dequeue().await;
        let outcome = executor.execute(&task).await;
        let done = outcome == TaskOutcome::Failed;
        outcomes.push(outcome);
        if done {
            break;
        }
    }

    assert_eq!(
        outcomes,
        vec![
            TaskOutcome::Retrying { next_attempt: 1 },
            TaskOutcome::Retrying { next_attempt: 2 },
            TaskOutcome::Failed,
        ]
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // Two redeliveries, each behind the configured backoff.
    assert!(started.elapsed() >= Duration::from_millis(100));

    match store.lookup("t-1") {
        TaskLookup::Failed { error } => assert!(error.contains("accelerator memory unavailable")),
        other => panic!("unexpected lookup: {other:?}"),
    }
    assert_eq!(store.queue_depth(), 0);
}

#[tokio::test]
async fn test_nonfinal_retry_leaves_status_processing() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut registry = CacheRegistry::new();
    registry.register(ModelCache::new(
        Box::new(ExhaustedBackend { attempts }),
        Duration::from_secs(1800),
    ));

    let config = WorkerConfig {
        max_attempts: 3,
        retry_backoff_ms: 50,
        ..WorkerConfig::default()
    };
    let store = InMemoryStore::new(Duration::from_secs(60));
    let executor = executor(&store, registry, config);

    store
        .enqueue(descriptor(
            "t-1",
            ModelFormat::ClassicalMl,
            Path::new("/models/m-1.json"),
        ))
        .unwrap();

    let task = store.dequeue().await;
    let outcome = executor.execute(&task).await;
    assert_eq!(outcome, TaskOutcome::Retrying { next_attempt: 1 });

    // Pollers must not observe a failure that will be retried.
    let status = store.get_status("t-1").unwrap();
    assert_eq!(status.status, TaskStatus::Processing);
    assert!(store.get_result("t-1").is_none());
}

#[tokio::test]
async fn test_missing_artifact_fails_on_first_attempt() {
    let registry = CacheRegistry::with_defaults(Duration::from_secs(1800));
    let store = InMemoryStore::new(Duration::from_secs(60));
    let executor = executor(&store, registry, WorkerConfig::default());

    let descriptor = descriptor(
        "t-1",
        ModelFormat::TensorGraph,
        Path::new("/nonexistent/model.json"),
    );
    store.enqueue(descriptor).unwrap();

    let task = store.dequeue().await;
    let outcome = executor.execute(&task).await;

    // A missing artifact is deterministic; retrying cannot fix it.
    assert_eq!(outcome, TaskOutcome::Failed);
    assert_eq!(store.queue_depth(), 0);
    match store.lookup("t-1") {
        TaskLookup::Failed { error } => assert!(error.contains("/nonexistent/model.json")),
        other => panic!("unexpected lookup: {other:?}"),
    }
}

#[tokio::test]
async fn test_hard_timeout_abandons_execution() {
    let mut registry = CacheRegistry::new();
    registry.register(ModelCache::new(
        Box::new(StallingBackend),
        Duration::from_secs(1800),
    ));

    let config = WorkerConfig {
        soft_timeout_secs: 0,
        hard_timeout_secs: 1,
        max_attempts: 1,
        ..WorkerConfig::default()
    };
    let store = InMemoryStore::new(Duration::from_secs(60));
    let executor = executor(&store, registry, config);

    store
        .enqueue(descriptor(
            "t-1",
            ModelFormat::ClassicalMl,
            Path::new("/models/m-1.json"),
        ))
        .unwrap();

    let started = Instant::now();
    let task = store.dequeue().await;
    let outcome = executor.execute(&task).await;

    assert_eq!(outcome, TaskOutcome::Failed);
    // Abandoned at the hard limit, not held for the full prediction.
    assert!(started.elapsed() < Duration::from_secs(3));
    match store.lookup("t-1") {
        TaskLookup::Failed { error } => assert!(error.contains("Timed out")),
        other => panic!("unexpected lookup: {other:?}"),
    }
}

#[tokio::test]
async fn test_tabular_task_completes_through_engine() {
    let mut artifact = tempfile::NamedTempFile::new().unwrap();
    write!(
        artifact,
        r#"{{"weights": [[1.0, -1.0]], "intercepts": [0.0], "target_names": ["reject", "accept"]}}"#
    )
    .unwrap();

    let registry = CacheRegistry::with_defaults(Duration::from_secs(1800));
    let store = InMemoryStore::new(Duration::from_secs(60));
    let executor = executor(&store, registry, WorkerConfig::default());

    store
        .enqueue(descriptor("t-1", ModelFormat::ClassicalMl, artifact.path()))
        .unwrap();

    let task = store.dequeue().await;
    let outcome = executor.execute(&task).await;
    assert_eq!(outcome, TaskOutcome::Completed);

    match store.lookup("t-1") {
        TaskLookup::Completed {
            result,
            elapsed_time,
        } => {
            // weights [1, -1] on input [1, 2] scores negative: class 0.
            assert_eq!(result["predictions"], json!(["reject"]));
            assert_eq!(result["inference_type"], json!("tabular"));
            assert_eq!(result["row_count"], json!(1));
            assert!(elapsed_time >= 0.0);
        }
        other => panic!("unexpected lookup: {other:?}"),
    }
}
