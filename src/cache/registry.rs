//! Format-to-cache registry
//!
//! Dispatch from a descriptor's model format to its cache instance is a
//! registration, not a branch edit: adding a format means implementing
//! [`FormatBackend`](super::FormatBackend) and registering a cache here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::task::ModelFormat;

use super::{ClassicalBackend, ModelCache, TensorGraphBackend, TransformerBackend};

/// Registry of model handle caches, one per format.
#[derive(Default)]
pub struct CacheRegistry {
    caches: HashMap<ModelFormat, Arc<ModelCache>>,
}

impl CacheRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the three built-in formats registered.
    pub fn with_defaults(max_idle: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(ModelCache::new(Box::new(TensorGraphBackend), max_idle));
        registry.register(ModelCache::new(Box::new(TransformerBackend), max_idle));
        registry.register(ModelCache::new(Box::new(ClassicalBackend), max_idle));
        registry
    }

    /// Register a cache under the format its backend serves. Replaces any
    /// previous registration for that format.
    pub fn register(&mut self, cache: ModelCache) {
        self.caches.insert(cache.format(), Arc::new(cache));
    }

    /// The cache instance for `format`, if registered.
    pub fn resolve(&self, format: ModelFormat) -> Option<Arc<ModelCache>> {
        self.caches.get(&format).map(Arc::clone)
    }

    /// All registered caches, for the maintenance sweep and health probe.
    pub fn caches(&self) -> impl Iterator<Item = &Arc<ModelCache>> {
        self.caches.values()
    }

    /// Unload every resident model. Used at worker shutdown.
    pub fn unload_all(&self) -> usize {
        self.caches
            .values()
            .filter(|cache| cache.unload_model())
            .count()
    }
}
