//! Worker configuration
//!
//! All knobs default to the platform's production values; tests override
//! individual fields to compress time-based behavior.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Configuration for one worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Retention window for status/result records, in seconds
    pub result_ttl_secs: u64,

    /// Idle time after which a resident model is eligible for eviction, in seconds
    pub max_idle_secs: u64,

    /// Total execution attempts per task (first try included)
    pub max_attempts: u32,

    /// Delay before a retryable failure is redelivered, in milliseconds
    pub retry_backoff_ms: u64,

    /// Soft wall-clock limit per execution; exceeding it logs a warning
    pub soft_timeout_secs: u64,

    /// Hard wall-clock limit per execution; exceeding it fails the task
    pub hard_timeout_secs: u64,

    /// Interval between idle-eviction sweeps, in seconds
    pub eviction_sweep_secs: u64,

    /// Interval between health probes, in seconds
    pub health_probe_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            result_ttl_secs: 3600,
            max_idle_secs: 1800,
            max_attempts: 3,
            retry_backoff_ms: 60_000,
            soft_timeout_secs: 300,
            hard_timeout_secs: 3600,
            eviction_sweep_secs: 600,
            health_probe_secs: 300,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Retention window as a [`Duration`]
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    /// Idle-eviction threshold as a [`Duration`]
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    /// Retry backoff as a [`Duration`]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Soft execution limit as a [`Duration`]
    pub fn soft_timeout(&self) -> Duration {
        Duration::from_secs(self.soft_timeout_secs)
    }

    /// Hard execution limit as a [`Duration`]
    pub fn hard_timeout(&self) -> Duration {
        Duration::from_secs(self.hard_timeout_secs)
    }
}
