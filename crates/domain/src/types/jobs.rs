//! Background job records

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::{JOB_DEFAULT_MAX_RETRIES, JOB_DEFAULT_PRIORITY};
use crate::impl_domain_status_conversions;

/// Kinds of background work. Each kind has exactly one processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    BulkQrCreate,
    BulkQrUpdate,
    QrExport,
    WebhookRetry,
    AnalyticsAggregate,
    ImageOptimization,
}

impl_domain_status_conversions!(JobType {
    BulkQrCreate => "bulk_qr_create",
    BulkQrUpdate => "bulk_qr_update",
    QrExport => "qr_export",
    WebhookRetry => "webhook_retry",
    AnalyticsAggregate => "analytics_aggregate",
    ImageOptimization => "image_optimization",
});

/// Lifecycle of a background job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl_domain_status_conversions!(JobStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

/// Optional knobs for [`BackgroundJob::new`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Higher runs first
    pub priority: i32,
    pub max_retries: u32,
    /// Earliest time the job may be claimed; `None` means immediately
    pub run_after: Option<DateTime<Utc>>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self { priority: JOB_DEFAULT_PRIORITY, max_retries: JOB_DEFAULT_MAX_RETRIES, run_after: None }
    }
}

/// A persisted unit of background work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundJob {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub retries: u32,
    pub max_retries: u32,
    pub run_after: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a failure does to a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFailureOutcome {
    /// Back to `pending` with the incremented retry count
    Rescheduled { retries: u32, run_after: DateTime<Utc> },
    /// Retry budget spent; job is terminally `failed`
    Exhausted,
}

impl BackgroundJob {
    /// New `pending` job with a fresh time-ordered id
    pub fn new(job_type: JobType, payload: Value, options: JobOptions, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            job_type,
            status: JobStatus::Pending,
            priority: options.priority,
            payload,
            result: None,
            error: None,
            retries: 0,
            max_retries: options.max_retries,
            run_after: options.run_after.unwrap_or(now),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Decide the effect of a failure at `now`.
    ///
    /// While `retries < max_retries` the job is rescheduled with a linearly
    /// growing delay of `backoff_base * (retries + 1)`; otherwise it is
    /// exhausted. Stores must apply the same rule atomically.
    pub fn failure_outcome(&self, now: DateTime<Utc>, backoff_base: Duration) -> JobFailureOutcome {
        if self.retries < self.max_retries {
            let multiplier = i32::try_from(self.retries.saturating_add(1)).unwrap_or(i32::MAX);
            JobFailureOutcome::Rescheduled {
                retries: self.retries + 1,
                run_after: now + backoff_base * multiplier,
            }
        } else {
            JobFailureOutcome::Exhausted
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}
