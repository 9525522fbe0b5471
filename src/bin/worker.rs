//! mlserve inference worker binary
//!
//! Usage: `worker [config.toml]`. Runs the pull loop and both maintenance
//! schedules until interrupted.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use mlserve_worker::config::WorkerConfig;
use mlserve_worker::maintenance;
use mlserve_worker::worker::{Worker, WorkerContext};

#[tokio::main]
async fn main() -> Result<()> {
    mlserve_worker::init();

    let config = match std::env::args().nth(1) {
        Some(path) => WorkerConfig::from_file(&path)?,
        None => WorkerConfig::default(),
    };

    let ctx = WorkerContext::new(config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let maintenance = tokio::spawn(maintenance::run(Arc::clone(&ctx), shutdown_rx.clone()));
    let worker = tokio::spawn(Worker::new(Arc::clone(&ctx)).run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown_tx.send(true)?;

    worker.await?;
    maintenance.await?;
    Ok(())
}
