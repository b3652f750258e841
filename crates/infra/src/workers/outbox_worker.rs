//! Periodic webhook outbox delivery

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qrgen_core::{BatchReport, WebhookOutbox};
use qrgen_domain::{Result as DomainResult, WebhooksConfig};
use tracing::warn;

use super::periodic::{PeriodicWorker, TickBudget, WorkerConfig, WorkerTask};

pub type OutboxWorker = PeriodicWorker<OutboxDeliveryTask>;

/// Releases abandoned claims, then claims and delivers one batch per tick.
pub struct OutboxDeliveryTask {
    outbox: Arc<WebhookOutbox>,
}

impl OutboxDeliveryTask {
    pub fn new(outbox: Arc<WebhookOutbox>) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl WorkerTask for OutboxDeliveryTask {
    type Report = BatchReport;

    fn name(&self) -> &'static str {
        "outbox_worker"
    }

    async fn run_once(&self, budget: &TickBudget) -> DomainResult<BatchReport> {
        if let Err(err) = self.outbox.recover_stale_entries().await {
            warn!(error = %err, "Stale webhook recovery failed");
        }
        if budget.is_cancelled() {
            return Ok(BatchReport::default());
        }
        self.outbox.process_pending().await
    }
}

impl OutboxWorker {
    pub fn from_config(outbox: Arc<WebhookOutbox>, config: &WebhooksConfig) -> Self {
        PeriodicWorker::new(
            OutboxDeliveryTask::new(outbox),
            WorkerConfig {
                poll_interval: Duration::from_secs(config.poll_interval_seconds.max(1)),
                ..WorkerConfig::default()
            },
        )
    }
}
