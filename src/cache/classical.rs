//! Classical-ML format: table-oriented linear models
//!
//! The artifact is a single JSON file holding the decision weights plus the
//! feature/target names exported at training time:
//!
//! ```json
//! {
//!   "weights": [[0.4, -1.2]],
//!   "intercepts": [0.1],
//!   "feature_names": ["sepal_len", "sepal_wid"],
//!   "target_names": ["setosa", "versicolor"]
//! }
//! ```
//!
//! One weight row means a binary decision function (positive score maps to
//! class 1); multiple rows mean one-vs-rest with argmax.

use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::task::ModelFormat;
use crate::{Error, Result};

use super::{FormatBackend, HandleMetadata, LoadedModel};

#[derive(Debug, Deserialize)]
struct ClassicalArtifact {
    weights: Vec<Vec<f64>>,
    intercepts: Vec<f64>,
    #[serde(default)]
    feature_names: Vec<String>,
    #[serde(default)]
    target_names: Vec<String>,
}

/// Loader for classical-ml artifacts.
pub struct ClassicalBackend;

impl FormatBackend for ClassicalBackend {
    fn format(&self) -> ModelFormat {
        ModelFormat::ClassicalMl
    }

    fn load(&self, location: &Path, _metadata: &HandleMetadata) -> Result<Box<dyn LoadedModel>> {
        let raw = std::fs::read_to_string(location).map_err(|e| {
            Error::model_load(format!("{}: {}", location.display(), e))
        })?;
        let artifact: ClassicalArtifact = serde_json::from_str(&raw).map_err(|e| {
            Error::model_load(format!(
                "{} is not a classical-ml artifact: {}",
                location.display(),
                e
            ))
        })?;
        ClassicalModel::from_artifact(artifact).map(|m| Box::new(m) as Box<dyn LoadedModel>)
    }
}

/// A loaded linear model.
#[derive(Debug)]
pub struct ClassicalModel {
    weights: Vec<Vec<f64>>,
    intercepts: Vec<f64>,
    feature_names: Vec<String>,
    target_names: Vec<String>,
}

impl ClassicalModel {
    fn from_artifact(artifact: ClassicalArtifact) -> Result<Self> {
        if artifact.weights.is_empty() {
            return Err(Error::model_load("classical-ml artifact has no weights"));
        }
        let n_features = artifact.weights[0].len();
        if artifact.weights.iter().any(|row| row.len() != n_features) {
            return Err(Error::model_load(
                "classical-ml artifact has ragged weight rows",
            ));
        }
        if artifact.intercepts.len() != artifact.weights.len() {
            return Err(Error::model_load(
                "classical-ml artifact intercept count does not match weight rows",
            ));
        }
        Ok(Self {
            weights: artifact.weights,
            intercepts: artifact.intercepts,
            feature_names: artifact.feature_names,
            target_names: artifact.target_names,
        })
    }

    /// Number of input features the model expects.
    pub fn n_features(&self) -> usize {
        self.weights[0].len()
    }

    /// Class index for one feature row.
    pub fn decide(&self, row: &[f64]) -> Result<usize> {
        if row.len() != self.n_features() {
            return Err(Error::inference(format!(
                "expected {} features, got {}",
                self.n_features(),
                row.len()
            )));
        }
        let scores: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.intercepts)
            .map(|(w, b)| w.iter().zip(row).map(|(wi, xi)| wi * xi).sum::<f64>() + b)
            .collect();

        if scores.len() == 1 {
            // Binary decision function.
            return Ok(usize::from(scores[0] > 0.0));
        }
        let argmax = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        Ok(argmax)
    }

    /// The prediction value for a class index: the target name when the
    /// artifact exported labels, otherwise the bare index.
    pub fn class_value(&self, index: usize) -> Value {
        match self.target_names.get(index) {
            Some(name) => json!(name),
            None => json!(index),
        }
    }

    fn rows_from_input(&self, input: &Value) -> Result<Vec<Vec<f64>>> {
        let data = input
            .get("data")
            .ok_or_else(|| Error::inference("input_data requires a 'data' field"))?;
        let outer = data
            .as_array()
            .ok_or_else(|| Error::inference("'data' must be an array of feature rows"))?;
        if outer.is_empty() {
            return Err(Error::inference("'data' is empty"));
        }

        // Accept both [[...], [...]] and a single bare row [x, y].
        let rows: Vec<&Value> = if outer[0].is_array() {
            outer.iter().collect()
        } else {
            vec![data]
        };

        rows.into_iter()
            .map(|row| {
                row.as_array()
                    .ok_or_else(|| Error::inference("feature row must be an array"))?
                    .iter()
                    .map(|v| {
                        v.as_f64()
                            .ok_or_else(|| Error::inference("feature values must be numeric"))
                    })
                    .collect()
            })
            .collect()
    }
}

impl LoadedModel for ClassicalModel {
    fn predict(&self, input: &Value, _params: &Map<String, Value>) -> Result<Value> {
        let rows = self.rows_from_input(input)?;
        let predictions = rows
            .iter()
            .map(|row| self.decide(row).map(|idx| self.class_value(idx)))
            .collect::<Result<Vec<_>>>()?;

        Ok(json!({
            "predictions": predictions,
            "feature_names": self.feature_names,
            "target_names": self.target_names,
            "model_type": "classical-ml",
        }))
    }
}
