//! Port interfaces for the background job queue

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use qrgen_domain::{BackgroundJob, Result};
use serde_json::Value;

/// Durable storage for background jobs.
///
/// `claim_next_job` and `fail_job` must each be a single atomic statement:
/// two workers racing on the same row may never both win.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a freshly created job
    async fn insert_job(&self, job: &BackgroundJob) -> Result<()>;

    /// Move the highest-priority due `pending` job to `processing`.
    ///
    /// Ordering is `priority DESC, run_after ASC`. Returns `None` when no job
    /// is due at `now`.
    async fn claim_next_job(&self, now: DateTime<Utc>) -> Result<Option<BackgroundJob>>;

    /// Mark a job `completed` with its result
    async fn complete_job(&self, id: &str, result: &Value, now: DateTime<Utc>) -> Result<()>;

    /// Record a failed run and return the job as stored afterwards.
    ///
    /// While `retries < max_retries` the job goes back to `pending` with
    /// `retries + 1` and `run_after = now + backoff_base * (retries + 1)`;
    /// otherwise it becomes terminally `failed`.
    async fn fail_job(
        &self,
        id: &str,
        error: &str,
        now: DateTime<Utc>,
        backoff_base: Duration,
    ) -> Result<BackgroundJob>;

    async fn get_job(&self, id: &str) -> Result<Option<BackgroundJob>>;

    /// Release `processing` jobs claimed before `claimed_before`.
    ///
    /// Each one is treated as a failed run due immediately: back to
    /// `pending` with `retries + 1` while retries remain, otherwise
    /// `failed`. One atomic statement; returns the number of rows released.
    async fn release_stale_jobs(
        &self,
        claimed_before: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>;
}
