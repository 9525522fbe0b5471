//! Model handle cache behavior: identity, thrash, eviction, pinning

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use mlserve_worker::cache::{FormatBackend, HandleMetadata, LoadedModel, ModelCache};
use mlserve_worker::task::ModelFormat;
use mlserve_worker::{Error, Result};

/// Backend that counts loads and unloads and can be switched to fail.
struct CountingBackend {
    loads: Arc<AtomicUsize>,
    unloads: Arc<AtomicUsize>,
    fail_loads: bool,
}

struct CountingModel {
    unloads: Arc<AtomicUsize>,
}

impl LoadedModel for CountingModel {
    fn predict(&self, _input: &Value, _params: &Map<String, Value>) -> Result<Value> {
        Ok(json!({"predictions": [1]}))
    }

    fn unload(&self) {
        self.unloads.fetch_add(1, Ordering::SeqCst);
    }
}

impl FormatBackend for CountingBackend {
    fn format(&self) -> ModelFormat {
        ModelFormat::ClassicalMl
    }

    fn load(&self, location: &Path, _metadata: &HandleMetadata) -> Result<Box<dyn LoadedModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads {
            return Err(Error::model_load(format!(
                "{}: artifact unreadable",
                location.display()
            )));
        }
        Ok(Box::new(CountingModel {
            unloads: Arc::clone(&self.unloads),
        }))
    }
}

struct Counters {
    loads: Arc<AtomicUsize>,
    unloads: Arc<AtomicUsize>,
}

fn counting_cache(max_idle: Duration, fail_loads: bool) -> (ModelCache, Counters) {
    let loads = Arc::new(AtomicUsize::new(0));
    let unloads = Arc::new(AtomicUsize::new(0));
    let cache = ModelCache::new(
        Box::new(CountingBackend {
            loads: Arc::clone(&loads),
            unloads: Arc::clone(&unloads),
            fail_loads,
        }),
        max_idle,
    );
    (cache, Counters { loads, unloads })
}

fn metadata() -> HandleMetadata {
    HandleMetadata {
        format: ModelFormat::ClassicalMl,
        task_type: "classification".into(),
    }
}

#[test]
fn test_cache_identity() {
    let (cache, counters) = counting_cache(Duration::from_secs(1800), false);

    let first = cache.get_model("m-a", Path::new("/m/a"), metadata()).unwrap();
    let second = cache.get_model("m-a", Path::new("/m/a"), metadata()).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
    assert_eq!(counters.unloads.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cache_thrash() {
    let (cache, counters) = counting_cache(Duration::from_secs(1800), false);

    cache.get_model("m-a", Path::new("/m/a"), metadata()).unwrap();
    cache.get_model("m-b", Path::new("/m/b"), metadata()).unwrap();

    // Exactly one unload (A) happened before the second load began.
    assert_eq!(counters.unloads.load(Ordering::SeqCst), 1);
    assert_eq!(counters.loads.load(Ordering::SeqCst), 2);
    assert_eq!(cache.resident_model_id().as_deref(), Some("m-b"));
}

#[test]
fn test_failed_load_leaves_cache_empty() {
    let (cache, counters) = counting_cache(Duration::from_secs(1800), true);

    let err = cache
        .get_model("m-a", Path::new("/m/a"), metadata())
        .unwrap_err();
    assert!(matches!(err, Error::ModelLoad(_)));
    assert_eq!(cache.resident_model_id(), None);
    assert!(!cache.should_evict());
    assert!(!cache.unload_model());
    assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
}

#[test]
fn test_eviction_predicate_timing() {
    let (cache, _counters) = counting_cache(Duration::from_millis(40), false);

    cache.get_model("m-a", Path::new("/m/a"), metadata()).unwrap();
    assert!(!cache.should_evict());

    std::thread::sleep(Duration::from_millis(60));
    assert!(cache.should_evict());

    // A fresh use resets the idle clock; get_model never evicts inline.
    cache.get_model("m-a", Path::new("/m/a"), metadata()).unwrap();
    assert!(!cache.should_evict());
    assert_eq!(cache.resident_model_id().as_deref(), Some("m-a"));
}

#[test]
fn test_evict_if_idle_unloads_once() {
    let (cache, counters) = counting_cache(Duration::from_millis(20), false);

    cache.get_model("m-a", Path::new("/m/a"), metadata()).unwrap();
    assert_eq!(cache.evict_if_idle(), None);

    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(cache.evict_if_idle(), Some("m-a".to_string()));
    assert_eq!(counters.unloads.load(Ordering::SeqCst), 1);

    // Idempotent on an empty cache.
    assert_eq!(cache.evict_if_idle(), None);
    assert_eq!(counters.unloads.load(Ordering::SeqCst), 1);
}

#[test]
fn test_inflight_handle_survives_unload() {
    let (cache, counters) = counting_cache(Duration::from_secs(1800), false);

    let handle = cache.get_model("m-a", Path::new("/m/a"), metadata()).unwrap();
    assert!(cache.unload_model());
    assert_eq!(counters.unloads.load(Ordering::SeqCst), 1);

    // The clone taken before the unload still works; the cache is empty.
    let out = handle.model.predict(&json!({}), &Map::new()).unwrap();
    assert_eq!(out["predictions"], json!([1]));
    assert_eq!(cache.resident_model_id(), None);
}
