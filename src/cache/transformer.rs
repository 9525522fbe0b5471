//! Transformer-runtime format: tokenizer + pipeline models
//!
//! The artifact is a directory (the descriptor's location may point at the
//! directory itself or any file inside it):
//!
//! - `tokenizer.json` - `{"vocab": {"token": id, ...}, "unk_token": "[UNK]"}`
//! - `model.json` - `{"embeddings": [[...], ...]}` plus an optional
//!   `"classifier": {"weights": [[...]], "bias": [...], "labels": [...]}`
//!
//! When the model carries a classifier head and the task type is not plain
//! feature extraction, loading builds a pipeline object over the tokenizer;
//! unloading tears down pipeline, tokenizer, then weights in that order.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::task::ModelFormat;
use crate::{Error, Result};

use super::{FormatBackend, HandleMetadata, LoadedModel};

const DEFAULT_MAX_LENGTH: usize = 512;

#[derive(Debug, Deserialize)]
struct TokenizerFile {
    vocab: HashMap<String, usize>,
    #[serde(default)]
    unk_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClassifierSpec {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    embeddings: Vec<Vec<f64>>,
    #[serde(default)]
    classifier: Option<ClassifierSpec>,
}

/// Loader for transformer-runtime artifacts.
pub struct TransformerBackend;

impl FormatBackend for TransformerBackend {
    fn format(&self) -> ModelFormat {
        ModelFormat::TransformerRuntime
    }

    fn load(&self, location: &Path, metadata: &HandleMetadata) -> Result<Box<dyn LoadedModel>> {
        let dir = if location.is_dir() {
            location
        } else {
            location.parent().unwrap_or(location)
        };

        let tokenizer_path = dir.join("tokenizer.json");
        if !tokenizer_path.exists() {
            return Err(Error::model_load(format!(
                "no tokenizer.json in {}: not a transformer-runtime artifact",
                dir.display()
            )));
        }
        let tokenizer: TokenizerFile = read_json(&tokenizer_path)?;
        let model: ModelFile = read_json(&dir.join("model.json"))?;

        if model.embeddings.is_empty() {
            return Err(Error::model_load(format!(
                "{}: embedding matrix is empty",
                dir.display()
            )));
        }
        let dim = model.embeddings[0].len();
        if model.embeddings.iter().any(|row| row.len() != dim) {
            return Err(Error::model_load(format!(
                "{}: ragged embedding matrix",
                dir.display()
            )));
        }

        let unk_id = tokenizer
            .unk_token
            .as_deref()
            .and_then(|t| tokenizer.vocab.get(t))
            .copied()
            .unwrap_or(0);

        let pipeline = match &model.classifier {
            Some(spec) if metadata.task_type != "feature-extraction" => {
                if spec.labels.is_empty() {
                    return Err(Error::model_load(format!(
                        "{}: classifier head has no labels",
                        dir.display()
                    )));
                }
                if spec.weights.len() != spec.labels.len()
                    || spec.bias.len() != spec.labels.len()
                    || spec.weights.iter().any(|row| row.len() != dim)
                {
                    return Err(Error::model_load(format!(
                        "{}: classifier head shape does not match embeddings",
                        dir.display()
                    )));
                }
                info!(task = %metadata.task_type, "pipeline created for task");
                Some(Pipeline {
                    task: metadata.task_type.clone(),
                    weights: spec.weights.clone(),
                    bias: spec.bias.clone(),
                    labels: spec.labels.clone(),
                })
            }
            _ => None,
        };

        Ok(Box::new(TransformerModel {
            tokenizer: Tokenizer {
                vocab: tokenizer.vocab,
                unk_id,
            },
            embeddings: model.embeddings,
            pipeline,
        }))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::model_load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::model_load(format!("{}: {}", path.display(), e)))
}

struct Tokenizer {
    vocab: HashMap<String, usize>,
    unk_id: usize,
}

impl Tokenizer {
    fn encode(&self, text: &str, max_length: usize) -> Vec<usize> {
        text.split_whitespace()
            .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|word| !word.is_empty())
            .map(|word| {
                self.vocab
                    .get(&word.to_lowercase())
                    .copied()
                    .unwrap_or(self.unk_id)
            })
            .take(max_length)
            .collect()
    }
}

struct Pipeline {
    task: String,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    labels: Vec<String>,
}

/// A loaded transformer-runtime model.
pub struct TransformerModel {
    tokenizer: Tokenizer,
    embeddings: Vec<Vec<f64>>,
    pipeline: Option<Pipeline>,
}

impl TransformerModel {
    fn pooled_embedding(&self, token_ids: &[usize]) -> Vec<f64> {
        let dim = self.embeddings[0].len();
        let mut pooled = vec![0.0; dim];
        let mut count = 0usize;
        for &id in token_ids {
            if let Some(row) = self.embeddings.get(id) {
                for (acc, v) in pooled.iter_mut().zip(row) {
                    *acc += v;
                }
                count += 1;
            }
        }
        if count > 0 {
            for v in &mut pooled {
                *v /= count as f64;
            }
        }
        pooled
    }

    fn classify(&self, pipeline: &Pipeline, pooled: &[f64]) -> (String, f64) {
        let logits: Vec<f64> = pipeline
            .weights
            .iter()
            .zip(&pipeline.bias)
            .map(|(w, b)| w.iter().zip(pooled).map(|(wi, xi)| wi * xi).sum::<f64>() + b)
            .collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let sum: f64 = exp.iter().sum();
        let (best, score) = exp
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, v)| (i, v / sum))
            .unwrap_or((0, 0.0));
        (pipeline.labels[best].clone(), score)
    }
}

impl LoadedModel for TransformerModel {
    fn predict(&self, input: &Value, params: &Map<String, Value>) -> Result<Value> {
        let text = input
            .get("text")
            .or_else(|| input.get("input"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::inference("text input required"))?;

        let max_length = params
            .get("max_length")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_LENGTH);

        let token_ids = self.tokenizer.encode(text, max_length);
        if token_ids.is_empty() {
            return Err(Error::inference("text input produced no tokens"));
        }
        let pooled = self.pooled_embedding(&token_ids);

        match &self.pipeline {
            Some(pipeline) => {
                let (label, score) = self.classify(pipeline, &pooled);
                Ok(json!({
                    "predictions": [{"label": label, "score": score}],
                    "model_type": "transformer-runtime",
                    "task": pipeline.task,
                    "used_pipeline": true,
                }))
            }
            None => Ok(json!({
                "predictions": [pooled],
                "model_type": "transformer-runtime",
                "used_pipeline": false,
            })),
        }
    }

    fn unload(&self) {
        // Teardown order matters on an accelerator: pipeline first, then
        // tokenizer, then the weight buffers.
        if self.pipeline.is_some() {
            debug!("clearing pipeline object");
        }
        debug!("clearing tokenizer");
        debug!("releasing embedding buffers");
    }
}
