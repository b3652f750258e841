//! Periodic drain of the background job queue

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qrgen_core::{BackgroundJobQueue, DrainReport, ProcessorRegistry};
use qrgen_domain::{JobsConfig, Result as DomainResult};
use tracing::warn;

use super::periodic::{PeriodicWorker, TickBudget, WorkerConfig, WorkerTask};

pub type JobWorker = PeriodicWorker<JobDrainTask>;

/// Releases abandoned claims, then runs up to `limit` due jobs per tick.
pub struct JobDrainTask {
    queue: Arc<BackgroundJobQueue>,
    registry: Arc<ProcessorRegistry>,
    limit: usize,
}

impl JobDrainTask {
    pub fn new(queue: Arc<BackgroundJobQueue>, registry: Arc<ProcessorRegistry>, limit: usize) -> Self {
        Self { queue, registry, limit: limit.max(1) }
    }
}

#[async_trait]
impl WorkerTask for JobDrainTask {
    type Report = DrainReport;

    fn name(&self) -> &'static str {
        "job_worker"
    }

    async fn run_once(&self, budget: &TickBudget) -> DomainResult<DrainReport> {
        if let Err(err) = self.queue.recover_stale_jobs().await {
            warn!(error = %err, "Stale job recovery failed");
        }
        self.queue.drain_while(&self.registry, self.limit, || budget.allows_more()).await
    }
}

impl JobWorker {
    pub fn from_config(
        queue: Arc<BackgroundJobQueue>,
        registry: Arc<ProcessorRegistry>,
        config: &JobsConfig,
    ) -> Self {
        // The job timeout applies to each attempt; a job with retries can run
        // for several of them. The tick stops claiming once one attempt's worth
        // of time has passed but always finishes the job it holds.
        PeriodicWorker::new(
            JobDrainTask::new(queue, registry, config.drain_limit),
            WorkerConfig {
                poll_interval: Duration::from_secs(config.poll_interval_seconds.max(1)),
                tick_budget: Duration::from_millis(config.processing_timeout_ms),
                ..WorkerConfig::default()
            },
        )
    }
}
