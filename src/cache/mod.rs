//! Model handle caches
//!
//! One [`ModelCache`] per model format holds at most one resident model at
//! a time: requesting a different model id unloads the current one first.
//! This single-slot policy is the worker's defense against accelerator
//! memory exhaustion; the trade-off is reload thrash when one worker
//! alternates between models of the same format.
//!
//! Format-specific loading and prediction live behind [`FormatBackend`] and
//! [`LoadedModel`]; the cache's shape is shared, its behavior polymorphic.

pub mod classical;
pub mod registry;
pub mod tensor;
pub mod transformer;

pub use classical::ClassicalBackend;
pub use registry::CacheRegistry;
pub use tensor::TensorGraphBackend;
pub use transformer::TransformerBackend;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::task::ModelFormat;
use crate::{Error, Result};

/// Format and task-type info a handle carries for re-dispatch.
#[derive(Debug, Clone)]
pub struct HandleMetadata {
    /// Loading/execution family
    pub format: ModelFormat,
    /// Task type the model was registered for
    pub task_type: String,
}

/// A loaded, ready-to-use model instance.
pub trait LoadedModel: Send + Sync {
    /// Run a prediction against this model.
    fn predict(&self, input: &Value, params: &Map<String, Value>) -> Result<Value>;

    /// Release format-specific resources (device detach, pipeline
    /// teardown). Called once when the cache drops its reference; the
    /// memory itself is reclaimed when the last outstanding handle clone
    /// goes away.
    fn unload(&self) {}
}

impl fmt::Debug for dyn LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel").finish_non_exhaustive()
    }
}

/// Format-specific artifact loader.
pub trait FormatBackend: Send + Sync {
    /// The format this backend serves
    fn format(&self) -> ModelFormat;

    /// Deserialize the artifact at `location` into a ready model.
    ///
    /// Must fail with a descriptive [`Error::ModelLoad`] when the artifact
    /// is missing, corrupt, or not in this format's native layout - never
    /// silently fall back to another loader.
    fn load(&self, location: &Path, metadata: &HandleMetadata) -> Result<Box<dyn LoadedModel>>;
}

/// An in-memory model plus its bookkeeping metadata.
///
/// Handles are shared as `Arc<ModelHandle>`: the cache holds one strong
/// reference and every in-flight predict holds its own clone, so the idle
/// sweep can never free a model out from under a running prediction.
pub struct ModelHandle {
    /// Id of the loaded model
    pub model_id: String,
    /// The loaded model instance
    pub model: Box<dyn LoadedModel>,
    /// Format/task-type info for re-dispatch
    pub metadata: HandleMetadata,
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", &self.model_id)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

struct CacheState {
    resident: Option<Arc<ModelHandle>>,
    last_used_at: Option<Instant>,
}

/// Single-resident model cache for one format family.
pub struct ModelCache {
    backend: Box<dyn FormatBackend>,
    max_idle: Duration,
    state: Mutex<CacheState>,
}

impl ModelCache {
    /// Create a cache over `backend` with the given idle-eviction
    /// threshold.
    pub fn new(backend: Box<dyn FormatBackend>, max_idle: Duration) -> Self {
        info!(
            format = %backend.format(),
            max_idle_secs = max_idle.as_secs(),
            "model cache initialized"
        );
        Self {
            backend,
            max_idle,
            state: Mutex::new(CacheState {
                resident: None,
                last_used_at: None,
            }),
        }
    }

    /// The format this cache serves.
    pub fn format(&self) -> ModelFormat {
        self.backend.format()
    }

    /// Get the handle for `model_id`, loading it if necessary.
    ///
    /// A hit refreshes the idle clock and returns the same handle (pointer
    /// identity holds). A miss with a different model resident unloads that
    /// model first. A failed load leaves the cache empty.
    pub fn get_model(
        &self,
        model_id: &str,
        location: &Path,
        metadata: HandleMetadata,
    ) -> Result<Arc<ModelHandle>> {
        let mut guard = self.state.lock();
        // Reborrow so the field borrows below are disjoint.
        let state = &mut *guard;

        if let Some(handle) = &state.resident {
            if handle.model_id == model_id {
                state.last_used_at = Some(Instant::now());
                return Ok(Arc::clone(handle));
            }
        }
        if state.resident.is_some() {
            let evicted = Self::drop_resident(state);
            info!(
                format = %self.format(),
                evicted = evicted.as_deref().unwrap_or("-"),
                requested = model_id,
                "evicting resident model to load a different one"
            );
        }

        info!(format = %self.format(), model_id, location = %location.display(), "loading model");
        let model = self.backend.load(location, &metadata).map_err(|err| {
            warn!(format = %self.format(), model_id, %err, "model load failed");
            err
        })?;

        let handle = Arc::new(ModelHandle {
            model_id: model_id.to_string(),
            model,
            metadata,
        });
        state.resident = Some(Arc::clone(&handle));
        state.last_used_at = Some(Instant::now());
        Ok(handle)
    }

    /// Unload the resident model, if any. Returns whether anything was
    /// actually unloaded.
    pub fn unload_model(&self) -> bool {
        let mut state = self.state.lock();
        match Self::drop_resident(&mut state) {
            Some(model_id) => {
                info!(format = %self.format(), model_id, "model unloaded");
                true
            }
            None => false,
        }
    }

    /// Whether the resident model has been idle past the threshold.
    /// Pure predicate; never unloads.
    pub fn should_evict(&self) -> bool {
        let state = self.state.lock();
        match (&state.resident, state.last_used_at) {
            (Some(_), Some(last_used)) => last_used.elapsed() > self.max_idle,
            _ => false,
        }
    }

    /// Unload the resident model if it is idle past the threshold.
    /// Only the maintenance sweep calls this; `get_model` never evicts for
    /// idleness inline.
    pub fn evict_if_idle(&self) -> Option<String> {
        let mut state = self.state.lock();
        let idle = match (&state.resident, state.last_used_at) {
            (Some(_), Some(last_used)) => last_used.elapsed() > self.max_idle,
            _ => false,
        };
        if !idle {
            return None;
        }
        let evicted = Self::drop_resident(&mut state);
        if let Some(model_id) = &evicted {
            info!(format = %self.format(), model_id, "idle model evicted");
        }
        evicted
    }

    /// Id of the currently resident model, for the health probe.
    pub fn resident_model_id(&self) -> Option<String> {
        self.state
            .lock()
            .resident
            .as_ref()
            .map(|handle| handle.model_id.clone())
    }

    /// Generic prediction through the resident model - the fallback path
    /// when no engine claims the (format, task type) pair.
    pub fn predict(&self, input: &Value, params: &Map<String, Value>) -> Result<Value> {
        let handle = {
            let mut state = self.state.lock();
            let handle = state
                .resident
                .as_ref()
                .map(Arc::clone)
                .ok_or_else(|| Error::inference("no model loaded"))?;
            state.last_used_at = Some(Instant::now());
            handle
        };
        // Lock released; the clone pins the handle for the call's duration.
        handle.model.predict(input, params)
    }

    fn drop_resident(state: &mut CacheState) -> Option<String> {
        let handle = state.resident.take()?;
        state.last_used_at = None;
        handle.model.unload();
        Some(handle.model_id.clone())
    }
}
