//! Inference engines and capability-based routing
//!
//! An engine declares which (format, task type) pairs it can serve; the
//! router does a linear first-match scan over registered engines. One
//! engine can serve multiple formats - the text engine handles textual
//! tasks on both tensor-graph and transformer-runtime models - without any
//! hard-coded format-to-engine mapping. When no engine matches, the
//! executor falls back to the format cache's own generic `predict`.

pub mod tabular;
pub mod text;

pub use tabular::TabularEngine;
pub use text::TextEngine;

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::cache::ModelHandle;
use crate::task::ModelFormat;
use crate::Result;

/// One execution strategy.
pub trait InferenceEngine: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &'static str;

    /// Whether this engine serves the given (format, task type) pair.
    /// `task_type` is lowercase.
    fn can_handle(&self, format: ModelFormat, task_type: &str) -> bool;

    /// Execute a prediction through `handle`.
    fn process(
        &self,
        handle: &ModelHandle,
        input: &Value,
        params: &Map<String, Value>,
    ) -> Result<Value>;
}

/// First-match router over registered engines.
#[derive(Default)]
pub struct EngineRouter {
    engines: Vec<Arc<dyn InferenceEngine>>,
}

impl EngineRouter {
    /// An empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// A router with the built-in engines registered.
    pub fn with_defaults() -> Self {
        let mut router = Self::new();
        router.register(Arc::new(TextEngine::new()));
        router.register(Arc::new(TabularEngine::new()));
        router
    }

    /// Append an engine. Registration order is match priority.
    pub fn register(&mut self, engine: Arc<dyn InferenceEngine>) {
        self.engines.push(engine);
    }

    /// The first engine claiming `(format, task_type)`, if any.
    pub fn resolve(
        &self,
        format: ModelFormat,
        task_type: &str,
    ) -> Option<Arc<dyn InferenceEngine>> {
        self.engines
            .iter()
            .find(|engine| engine.can_handle(format, task_type))
            .map(Arc::clone)
    }
}
