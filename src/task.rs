//! Task descriptors, status records, and result records
//!
//! These are the serialized shapes shared with the external API layer:
//! the descriptor is what the API enqueues, the status and result records
//! are what it polls for.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Model format discriminator - selects the loading/execution family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFormat {
    /// Dense tensor-graph models (feed-forward layer stacks)
    TensorGraph,
    /// Tokenizer + pipeline models for text tasks
    TransformerRuntime,
    /// Table-oriented classical ML models (linear family)
    ClassicalMl,
}

impl ModelFormat {
    /// The kebab-case wire name of this format
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFormat::TensorGraph => "tensor-graph",
            ModelFormat::TransformerRuntime => "transformer-runtime",
            ModelFormat::ClassicalMl => "classical-ml",
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inference request, immutable once enqueued.
///
/// The worker never mutates a descriptor; retry bookkeeping lives in the
/// delivery envelope ([`QueuedTask`]), not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Globally unique id, assigned by the submitter
    pub task_id: String,
    /// Which registered model to run
    pub model_id: String,
    /// Where the model artifact lives on disk
    pub model_location: PathBuf,
    /// Loading/execution family
    pub model_format: ModelFormat,
    /// Task type, lowercase (e.g. "classification", "text-generation")
    pub task_type: String,
    /// Opaque structured payload forwarded to the engine
    pub input_data: Value,
    /// Optional execution overrides
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl TaskDescriptor {
    /// A descriptor with a freshly generated task id. The external API
    /// layer normally assigns ids; this is for embedded and test
    /// submitters.
    pub fn new(
        model_id: impl Into<String>,
        model_location: impl Into<PathBuf>,
        model_format: ModelFormat,
        task_type: impl Into<String>,
        input_data: Value,
    ) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            model_id: model_id.into(),
            model_location: model_location.into(),
            model_format,
            task_type: task_type.into(),
            input_data,
            parameters: Map::new(),
        }
    }
}

/// Delivery envelope around a descriptor.
///
/// `attempt` is 0 for first delivery and increments on each retry
/// redelivery, so "3 attempts" means attempts 0, 1 and 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    /// The immutable request
    pub descriptor: TaskDescriptor,
    /// Zero-based execution attempt
    #[serde(default)]
    pub attempt: u32,
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Enqueued, not yet picked up
    Pending,
    /// A worker is executing the task
    Processing,
    /// Terminal: result available
    Completed,
    /// Terminal: error available
    Failed,
}

impl TaskStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether a write moving `self -> next` preserves monotonicity.
    ///
    /// Same-state rewrites are allowed (at-least-once redelivery can mark
    /// `processing` twice); terminal states accept no further writes.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            _ if *self == next && !self.is_terminal() => true,
            (TaskStatus::Pending, TaskStatus::Processing) => true,
            (TaskStatus::Processing, TaskStatus::Completed) => true,
            (TaskStatus::Processing, TaskStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Mutable status record keyed by task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusRecord {
    /// Current lifecycle state
    pub status: TaskStatus,
    /// Model the task targets, filled in when processing starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Unix seconds when processing started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<f64>,
    /// Unix seconds when the task reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<f64>,
}

impl TaskStatusRecord {
    /// A fresh record in `pending`
    pub fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            model_id: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Terminal outcome record keyed by task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskResultRecord {
    /// Successful execution
    Completed {
        /// Engine output
        result: Value,
        /// Wall-clock execution time in seconds
        processing_time: f64,
        /// Model that produced the result
        model_id: String,
        /// Format family that served the request
        model_format: ModelFormat,
        /// Unix seconds at completion
        completed_at: f64,
    },
    /// Failed execution (retries, if any, exhausted)
    Failed {
        /// Human-readable error; never a stack trace
        error: String,
        /// Unix seconds at failure
        failed_at: f64,
    },
}

/// Combined poll response handed back to the external layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskLookup {
    /// Unknown id, or the record's retention window has lapsed
    NotFound,
    /// Enqueued, not yet picked up
    Pending,
    /// Currently executing
    Processing,
    /// Terminal success
    Completed {
        /// Engine output
        result: Value,
        /// Wall-clock execution time in seconds
        elapsed_time: f64,
    },
    /// Terminal failure
    Failed {
        /// Human-readable error
        error: String,
    },
}

/// Current wall-clock time as fractional unix seconds.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}
