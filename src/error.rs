//! Error types for the inference worker

use thiserror::Error;

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the inference worker.
///
/// The executor's retry decision is driven by [`Error::is_retryable`]:
/// deterministic failures (a corrupt artifact, a malformed input tensor)
/// fail the task on the first attempt, while transient failures (device
/// memory pressure, timeouts, store hiccups) are re-enqueued with backoff.
#[derive(Debug, Error)]
pub enum Error {
    /// Model artifact missing, corrupt, or not in the format's native layout
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    /// Prediction failed (bad input shape, missing field, numerical failure)
    #[error("Inference failed: {0}")]
    InferenceExecution(String),

    /// Out of device or host memory while loading or executing
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Execution exceeded the hard wall-clock limit
    #[error("Timed out after {seconds}s: {context}")]
    Timeout {
        /// Elapsed seconds when the task was abandoned
        seconds: u64,
        /// What was being executed
        context: String,
    },

    /// No cache registered for the descriptor's model format
    #[error("No cache registered for model format '{0}'")]
    UnknownFormat(String),

    /// Status/result store rejected an operation
    #[error("Store error: {0}")]
    Store(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the executor should re-enqueue the task after this failure.
    ///
    /// Only failures that can plausibly resolve on their own are retried.
    /// Retrying a deterministic `ModelLoad` or `InferenceExecution` would
    /// burn the whole retry budget for no benefit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ResourceExhausted(_) | Error::Timeout { .. } | Error::Store(_)
        )
    }

    /// Create a model load error
    pub fn model_load(msg: impl Into<String>) -> Self {
        Error::ModelLoad(msg.into())
    }

    /// Create an inference execution error
    pub fn inference(msg: impl Into<String>) -> Self {
        Error::InferenceExecution(msg.into())
    }
}
