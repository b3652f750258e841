//! Typed dispatch from job type to processor

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use qrgen_domain::{JobType, QrGenError, Result};
use serde_json::Value;

use crate::webhooks::WebhookOutbox;

/// Handles the payload of one job type
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Run the job. May be invoked several times for one job, so side effects
    /// should be idempotent.
    async fn process(&self, payload: &Value) -> Result<Value>;
}

/// Processors keyed by [`JobType`]
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobType, Arc<dyn JobProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `processor` for `job_type`, replacing any earlier one
    #[must_use]
    pub fn with(mut self, job_type: JobType, processor: Arc<dyn JobProcessor>) -> Self {
        self.register(job_type, processor);
        self
    }

    pub fn register(&mut self, job_type: JobType, processor: Arc<dyn JobProcessor>) {
        self.processors.insert(job_type, processor);
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobProcessor>> {
        self.processors.get(&job_type).cloned()
    }

    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.processors.keys().copied().collect();
        types.sort_by_key(JobType::as_str);
        types
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry").field("job_types", &self.job_types()).finish()
    }
}

/// Processor for `webhook_retry` jobs: runs one pass over the webhook outbox
pub struct WebhookRetryProcessor {
    outbox: Arc<WebhookOutbox>,
}

impl WebhookRetryProcessor {
    pub fn new(outbox: Arc<WebhookOutbox>) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl JobProcessor for WebhookRetryProcessor {
    async fn process(&self, _payload: &Value) -> Result<Value> {
        let report = self.outbox.process_pending().await?;
        serde_json::to_value(&report).map_err(|e| QrGenError::Internal(e.to_string()))
    }
}
