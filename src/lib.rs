//! mlserve worker - the inference worker core of the mlserve serving platform
//!
//! This crate implements the piece of the platform that sits between the
//! external API layer and the accelerator: it pulls task descriptors from a
//! shared work queue, obtains (loading or reusing) the in-memory model for
//! the request's format, routes execution through a capability-matched
//! inference engine, and publishes a TTL-bounded result record.
//!
//! The external HTTP layer, user/model metadata storage, and file upload
//! management are separate services; they only interact with this crate
//! through the task queue and status store contract in [`store`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod executor;
pub mod maintenance;
pub mod monitor;
pub mod store;
pub mod task;
pub mod worker;

mod error;
pub use error::{Error, Result};

/// Initialize the worker runtime.
///
/// Installs the global tracing subscriber. Call once at process startup;
/// library consumers embedding the worker in a larger process should skip
/// this and install their own subscriber.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("mlserve worker runtime initialized");
}
