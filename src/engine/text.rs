//! Text engine: textual tasks on tensor-graph and transformer-runtime models

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::cache::ModelHandle;
use crate::task::ModelFormat;
use crate::{Error, Result};

use super::InferenceEngine;

const SUPPORTED_TASKS: &[&str] = &[
    "text-classification",
    "sentiment-analysis",
    "text-generation",
    "feature-extraction",
    "question-answering",
    "summarization",
];

/// Engine for text-oriented task types.
pub struct TextEngine;

impl TextEngine {
    /// Create the text engine.
    pub fn new() -> Self {
        Self
    }

    fn text_of<'a>(input: &'a Value) -> Option<&'a str> {
        input
            .get("text")
            .or_else(|| input.get("input"))
            .and_then(|v| v.as_str())
    }
}

impl Default for TextEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for TextEngine {
    fn name(&self) -> &'static str {
        "text"
    }

    fn can_handle(&self, format: ModelFormat, task_type: &str) -> bool {
        let format_ok = matches!(
            format,
            ModelFormat::TensorGraph | ModelFormat::TransformerRuntime
        );
        format_ok && (SUPPORTED_TASKS.contains(&task_type) || task_type.contains("text"))
    }

    fn process(
        &self,
        handle: &ModelHandle,
        input: &Value,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let text = Self::text_of(input)
            .ok_or_else(|| Error::inference("text input required for text inference"))?;
        let input_length = text.chars().count();

        let mut params = params.clone();
        params
            .entry("max_length".to_string())
            .or_insert_with(|| json!(512));
        if handle.metadata.task_type == "text-generation" && !params.contains_key("do_sample") {
            params.insert("do_sample".to_string(), json!(true));
            params.insert("temperature".to_string(), json!(0.7));
        }

        debug!(task = %handle.metadata.task_type, input_length, "processing text inference");
        let mut result = handle.model.predict(input, &params)?;

        if let Some(obj) = result.as_object_mut() {
            obj.insert("inference_type".to_string(), json!("text"));
            obj.insert("input_length".to_string(), json!(input_length));
        }
        Ok(result)
    }
}
