//! Tensor-graph format: dense feed-forward layer stacks
//!
//! The artifact is a JSON file describing an ordered stack of dense layers:
//!
//! ```json
//! {
//!   "layers": [
//!     {"weights": [[...], ...], "bias": [...], "activation": "relu"},
//!     {"weights": [[...], ...], "bias": [...], "activation": "softmax"}
//!   ]
//! }
//! ```
//!
//! Weight rows are output units, columns are inputs. Execution runs on the
//! host via `ndarray`; the handle records which device served the request.

use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::task::ModelFormat;
use crate::{Error, Result};

use super::{FormatBackend, HandleMetadata, LoadedModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Activation {
    Relu,
    Softmax,
    Identity,
}

#[derive(Debug, Deserialize)]
struct LayerSpec {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    #[serde(default = "default_activation")]
    activation: Activation,
}

fn default_activation() -> Activation {
    Activation::Identity
}

#[derive(Debug, Deserialize)]
struct TensorGraphArtifact {
    layers: Vec<LayerSpec>,
}

/// Loader for tensor-graph artifacts.
pub struct TensorGraphBackend;

impl FormatBackend for TensorGraphBackend {
    fn format(&self) -> ModelFormat {
        ModelFormat::TensorGraph
    }

    fn load(&self, location: &Path, _metadata: &HandleMetadata) -> Result<Box<dyn LoadedModel>> {
        if !location.exists() {
            return Err(Error::model_load(format!(
                "model file not found: {}",
                location.display()
            )));
        }
        let raw = std::fs::read_to_string(location)
            .map_err(|e| Error::model_load(format!("{}: {}", location.display(), e)))?;
        let artifact: TensorGraphArtifact = serde_json::from_str(&raw).map_err(|e| {
            Error::model_load(format!(
                "{} is not a tensor-graph artifact: {}",
                location.display(),
                e
            ))
        })?;
        TensorGraphModel::from_artifact(artifact).map(|m| Box::new(m) as Box<dyn LoadedModel>)
    }
}

struct Layer {
    weights: Array2<f64>,
    bias: Array1<f64>,
    activation: Activation,
}

/// A loaded feed-forward network.
pub struct TensorGraphModel {
    layers: Vec<Layer>,
    device: &'static str,
}

impl TensorGraphModel {
    fn from_artifact(artifact: TensorGraphArtifact) -> Result<Self> {
        if artifact.layers.is_empty() {
            return Err(Error::model_load("tensor-graph artifact has no layers"));
        }
        let mut layers = Vec::with_capacity(artifact.layers.len());
        for (i, spec) in artifact.layers.into_iter().enumerate() {
            let out = spec.weights.len();
            let cols = spec.weights.first().map(|r| r.len()).unwrap_or(0);
            if out == 0 || cols == 0 {
                return Err(Error::model_load(format!("layer {i} has empty weights")));
            }
            if spec.bias.len() != out {
                return Err(Error::model_load(format!(
                    "layer {i} bias length {} does not match {} output units",
                    spec.bias.len(),
                    out
                )));
            }
            let flat: Vec<f64> = spec.weights.iter().flatten().copied().collect();
            if flat.len() != out * cols {
                return Err(Error::model_load(format!("layer {i} has ragged weights")));
            }
            layers.push(Layer {
                weights: Array2::from_shape_vec((out, cols), flat)
                    .map_err(|e| Error::model_load(format!("layer {i}: {e}")))?,
                bias: Array1::from_vec(spec.bias),
                activation: spec.activation,
            });
        }
        Ok(Self {
            layers,
            device: "cpu",
        })
    }

    /// Input width of the first layer.
    pub fn input_width(&self) -> usize {
        self.layers[0].weights.ncols()
    }

    /// Forward pass over a batch of rows.
    pub fn forward(&self, batch: Array2<f64>) -> Result<Array2<f64>> {
        if batch.ncols() != self.input_width() {
            return Err(Error::inference(format!(
                "expected input width {}, got {}",
                self.input_width(),
                batch.ncols()
            )));
        }
        let mut x = batch;
        for layer in &self.layers {
            if x.ncols() != layer.weights.ncols() {
                return Err(Error::inference("layer width mismatch in graph"));
            }
            let mut y = x.dot(&layer.weights.t()) + &layer.bias;
            match layer.activation {
                Activation::Relu => y.mapv_inplace(|v| v.max(0.0)),
                Activation::Softmax => {
                    for mut row in y.axis_iter_mut(Axis(0)) {
                        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                        row.mapv_inplace(|v| (v - max).exp());
                        let sum = row.sum();
                        if sum > 0.0 {
                            row.mapv_inplace(|v| v / sum);
                        }
                    }
                }
                Activation::Identity => {}
            }
            x = y;
        }
        Ok(x)
    }

    fn batch_from_input(input: &Value) -> Result<Array2<f64>> {
        let raw = input
            .get("tensor")
            .or_else(|| input.get("data"))
            .ok_or_else(|| {
                Error::inference("invalid input format, expected 'tensor' or 'data' key")
            })?;
        let outer = raw
            .as_array()
            .ok_or_else(|| Error::inference("tensor input must be an array"))?;
        if outer.is_empty() {
            return Err(Error::inference("tensor input is empty"));
        }

        // A 1-D input gains a batch dimension.
        let rows: Vec<Vec<f64>> = if outer[0].is_array() {
            outer
                .iter()
                .map(|row| {
                    row.as_array()
                        .ok_or_else(|| Error::inference("tensor rows must be arrays"))?
                        .iter()
                        .map(|v| {
                            v.as_f64().ok_or_else(|| {
                                Error::inference("tensor values must be numeric")
                            })
                        })
                        .collect()
                })
                .collect::<Result<_>>()?
        } else {
            vec![outer
                .iter()
                .map(|v| {
                    v.as_f64()
                        .ok_or_else(|| Error::inference("tensor values must be numeric"))
                })
                .collect::<Result<_>>()?]
        };

        let width = rows[0].len();
        if width == 0 {
            return Err(Error::inference("tensor rows are empty"));
        }
        if rows.iter().any(|r| r.len() != width) {
            return Err(Error::inference("tensor rows have inconsistent widths"));
        }
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((flat.len() / width, width), flat)
            .map_err(|e| Error::inference(e.to_string()))
    }
}

impl LoadedModel for TensorGraphModel {
    fn predict(&self, input: &Value, _params: &Map<String, Value>) -> Result<Value> {
        let batch = Self::batch_from_input(input)?;
        let output = self.forward(batch)?;
        let predictions: Vec<Vec<f64>> = output.outer_iter().map(|row| row.to_vec()).collect();
        Ok(json!({
            "predictions": predictions,
            "model_type": "tensor-graph",
            "device": self.device,
        }))
    }

    fn unload(&self) {
        debug!(device = self.device, "releasing tensor-graph buffers");
    }
}
