//! qrgen worker
//!
//! Runs the background job and webhook outbox loops until interrupted.

mod context;

use anyhow::Context as _;
use qrgen_core::{Filter, Row};
use qrgen_infra::{config, init_tracing};
use tracing::{info, warn};

use crate::context::WorkerContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    let config = config::load().context("failed to load configuration")?;
    init_tracing(&config.logging);

    match dotenv {
        Ok(path) => info!(path = %path.display(), "Loaded .env"),
        Err(e) => info!(error = %e, "No .env file loaded"),
    }

    let ctx = WorkerContext::new(config).await?;
    if let Some(data) = &ctx.data {
        let versions: Vec<Row> = data
            .select("schema_version", &Filter::new())
            .await
            .context("database probe failed")?;
        info!(schema_versions = versions.len(), "Database reachable");
    }

    let mut job_worker = ctx.config.jobs.enabled.then(|| ctx.job_worker());
    let mut outbox_worker = ctx.config.webhooks.enabled.then(|| ctx.outbox_worker());

    if let Some(worker) = job_worker.as_mut() {
        worker.start()?;
    }
    if let Some(worker) = outbox_worker.as_mut() {
        worker.start()?;
    }
    info!(
        jobs = job_worker.is_some(),
        webhooks = outbox_worker.is_some(),
        "qrgen worker started"
    );

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    if let Some(worker) = job_worker.as_mut() {
        if let Err(e) = worker.stop().await {
            warn!(error = %e, "Job worker did not stop cleanly");
        }
    }
    if let Some(worker) = outbox_worker.as_mut() {
        if let Err(e) = worker.stop().await {
            warn!(error = %e, "Outbox worker did not stop cleanly");
        }
    }

    for breaker in ctx.breakers.snapshot() {
        info!(name = %breaker.name, state = ?breaker.state, failures = breaker.failure_count, "Circuit breaker at shutdown");
    }
    Ok(())
}
