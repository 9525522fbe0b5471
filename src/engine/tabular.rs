//! Tabular engine: classification and regression on classical-ML models

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::cache::ModelHandle;
use crate::task::ModelFormat;
use crate::{Error, Result};

use super::InferenceEngine;

/// Engine for table-oriented task types on the classical-ml format.
pub struct TabularEngine;

impl TabularEngine {
    /// Create the tabular engine.
    pub fn new() -> Self {
        Self
    }
}

impl Default for TabularEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for TabularEngine {
    fn name(&self) -> &'static str {
        "tabular"
    }

    fn can_handle(&self, format: ModelFormat, task_type: &str) -> bool {
        format == ModelFormat::ClassicalMl
            && matches!(task_type, "classification" | "regression")
    }

    fn process(
        &self,
        handle: &ModelHandle,
        input: &Value,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let rows = input
            .get("data")
            .and_then(|v| v.as_array())
            .filter(|rows| !rows.is_empty())
            .ok_or_else(|| {
                Error::inference("tabular inference requires a non-empty 'data' array")
            })?;
        let row_count = rows.len();

        debug!(task = %handle.metadata.task_type, row_count, "processing tabular inference");
        let mut result = handle.model.predict(input, params)?;

        if let Some(obj) = result.as_object_mut() {
            obj.insert("inference_type".to_string(), json!("tabular"));
            obj.insert("row_count".to_string(), json!(row_count));
        }
        Ok(result)
    }
}
