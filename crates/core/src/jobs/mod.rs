//! Persisted background job queue
//!
//! Jobs are claimed atomically by the store, run through a
//! [`RetryExecutor`] with a five minute per-attempt timeout, and on failure
//! rescheduled with linear backoff until `max_retries` is spent.

pub mod ports;
pub mod processor;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use qrgen_common::resilience::{RetryConfig, RetryExecutor};
use qrgen_domain::constants::MAX_ERROR_MESSAGE_LENGTH;
use qrgen_domain::{
    truncate_text, AuditEvent, BackgroundJob, JobOptions, JobStatus, JobType, JobsConfig,
    QrGenError, Result,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

pub use self::ports::JobStore;
pub use self::processor::{JobProcessor, ProcessorRegistry, WebhookRetryProcessor};
use crate::policy::{config_error, from_retry_error};
use crate::side_channel::AuditLogger;

/// Outcome of running one claimed job
#[derive(Debug, Clone, PartialEq)]
pub struct JobRun {
    pub job_id: String,
    pub job_type: JobType,
    pub outcome: Result<Value>,
}

impl JobRun {
    pub const fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Summary of one [`BackgroundJobQueue::drain`] pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
}

impl DrainReport {
    pub fn processed(&self) -> usize {
        self.completed.len() + self.failed.len()
    }
}

/// Background job queue service
#[derive(Clone)]
pub struct BackgroundJobQueue {
    store: Arc<dyn JobStore>,
    processing_timeout: StdDuration,
    retry_backoff: Duration,
    stale_after: Duration,
    audit: AuditLogger,
}

impl BackgroundJobQueue {
    pub fn new(store: Arc<dyn JobStore>, config: &JobsConfig) -> Self {
        let retry_backoff_ms = i64::try_from(config.retry_backoff_ms).unwrap_or(i64::MAX);
        let stale_after_ms = i64::try_from(config.stale_after_ms).unwrap_or(i64::MAX);
        Self {
            store,
            processing_timeout: StdDuration::from_millis(config.processing_timeout_ms),
            retry_backoff: Duration::milliseconds(retry_backoff_ms),
            stale_after: Duration::milliseconds(stale_after_ms),
            audit: AuditLogger::disabled(),
        }
    }

    /// Emit audit events for terminal failures through `audit`
    #[must_use]
    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Create a `pending` job
    ///
    /// # Errors
    /// Returns the store error if the insert fails.
    #[instrument(skip(self, payload, options), fields(priority = options.priority))]
    pub async fn create_job(
        &self,
        job_type: JobType,
        payload: Value,
        options: JobOptions,
    ) -> Result<BackgroundJob> {
        let job = BackgroundJob::new(job_type, payload, options, Utc::now());
        self.store.insert_job(&job).await?;
        debug!(job_id = %job.id, run_after = %job.run_after, "Background job created");
        Ok(job)
    }

    /// Atomically claim the next due job
    ///
    /// # Errors
    /// Returns the store error if the claim statement fails.
    pub async fn claim_next_job(&self) -> Result<Option<BackgroundJob>> {
        self.store.claim_next_job(Utc::now()).await
    }

    /// # Errors
    /// Returns the store error if the update fails.
    pub async fn complete_job(&self, id: &str, result: &Value) -> Result<()> {
        self.store.complete_job(id, result, Utc::now()).await
    }

    /// Record a failed run: reschedule while retries remain, otherwise mark
    /// the job terminally `failed`.
    ///
    /// # Errors
    /// Returns the store error if the update fails.
    pub async fn fail_job(&self, id: &str, error: &str) -> Result<BackgroundJob> {
        let error = truncate_text(error, MAX_ERROR_MESSAGE_LENGTH);
        let job = self.store.fail_job(id, &error, Utc::now(), self.retry_backoff).await?;

        if job.status == JobStatus::Failed {
            warn!(job_id = %job.id, job_type = %job.job_type, retries = job.retries, "Background job failed permanently");
            let _ = self
                .audit
                .record(
                    AuditEvent::failure(
                        "job.failed",
                        "background_job",
                        Some(job.id.clone()),
                        error,
                        Utc::now(),
                    )
                    .with_metadata(serde_json::json!({
                        "job_type": job.job_type,
                        "retries": job.retries,
                    })),
                )
                .await;
        } else {
            info!(job_id = %job.id, retries = job.retries, run_after = %job.run_after, "Background job rescheduled");
        }

        Ok(job)
    }

    /// Release jobs left in `processing` longer than the stale window.
    ///
    /// A worker that died mid-job never records an outcome; its claim is
    /// counted as one failed run and the job becomes claimable again while
    /// retries remain.
    ///
    /// # Errors
    /// Returns the store error if the update fails.
    pub async fn recover_stale_jobs(&self) -> Result<u64> {
        let now = Utc::now();
        let claimed_before = now.checked_sub_signed(self.stale_after).unwrap_or(now);
        let released = self
            .store
            .release_stale_jobs(claimed_before, "Processing abandoned; claim released", now)
            .await?;
        if released > 0 {
            warn!(released, "Released stale background job claims");
        }
        Ok(released)
    }

    /// # Errors
    /// Returns the store error if the lookup fails.
    pub async fn get_job(&self, id: &str) -> Result<Option<BackgroundJob>> {
        self.store.get_job(id).await
    }

    /// Run `processor` for a claimed job.
    ///
    /// The processor is retried up to `job.max_retries` times under the
    /// processing timeout. On success the job is completed with the returned
    /// value; on failure it is handed to [`fail_job`](Self::fail_job) and a
    /// `JobFailed` error is returned.
    ///
    /// # Errors
    /// `JobFailed` when the processor did not succeed, or the store error if
    /// completing the job fails.
    #[instrument(skip(self, job, processor), fields(job_id = %job.id, job_type = %job.job_type))]
    pub async fn process_job(
        &self,
        job: &BackgroundJob,
        processor: &dyn JobProcessor,
    ) -> Result<Value> {
        let executor = self.executor_for(job)?;
        let outcome = executor
            .execute(|| processor.process(&job.payload))
            .await
            .map_err(|err| from_retry_error(err, "job processing"));

        match outcome {
            Ok(result) => {
                self.complete_job(&job.id, &result).await?;
                info!("Background job completed");
                Ok(result)
            }
            Err(err) => {
                let message = err.to_string();
                if let Err(record_err) = self.fail_job(&job.id, &message).await {
                    warn!(error = %record_err, "Failed to record job failure");
                }
                Err(QrGenError::JobFailed(message))
            }
        }
    }

    /// Claim one job and dispatch it to its registered processor.
    ///
    /// Returns `None` when nothing is due. A job without a processor is
    /// failed like any other failing job.
    ///
    /// # Errors
    /// Only claim errors are returned; a failing job is reported in
    /// [`JobRun::outcome`].
    pub async fn run_next(&self, registry: &ProcessorRegistry) -> Result<Option<JobRun>> {
        let Some(job) = self.claim_next_job().await? else {
            return Ok(None);
        };

        let outcome = match registry.get(job.job_type) {
            Some(processor) => self.process_job(&job, processor.as_ref()).await,
            None => {
                let message = format!("No processor registered for job type {}", job.job_type);
                warn!(job_id = %job.id, "{message}");
                if let Err(record_err) = self.fail_job(&job.id, &message).await {
                    warn!(job_id = %job.id, error = %record_err, "Failed to record job failure");
                }
                Err(QrGenError::JobFailed(message))
            }
        };

        Ok(Some(JobRun { job_id: job.id, job_type: job.job_type, outcome }))
    }

    /// Run up to `limit` jobs, continuing past failures.
    ///
    /// Stops early when the queue is empty or a claim fails; a claim error
    /// after the first job is logged and ends the pass.
    ///
    /// # Errors
    /// Returns the claim error if the very first claim fails.
    pub async fn drain(&self, registry: &ProcessorRegistry, limit: usize) -> Result<DrainReport> {
        self.drain_while(registry, limit, || true).await
    }

    /// Like [`drain`](Self::drain), but `keep_going` is checked before each
    /// claim. A job that has been claimed always runs to a recorded outcome.
    ///
    /// # Errors
    /// Returns the claim error if the very first claim fails.
    #[instrument(skip(self, registry, keep_going))]
    pub async fn drain_while<F>(
        &self,
        registry: &ProcessorRegistry,
        limit: usize,
        mut keep_going: F,
    ) -> Result<DrainReport>
    where
        F: FnMut() -> bool + Send,
    {
        let mut report = DrainReport::default();

        while report.processed() < limit {
            if !keep_going() {
                debug!(processed = report.processed(), "Drain pass ended before limit");
                break;
            }

            let run = match self.run_next(registry).await {
                Ok(Some(run)) => run,
                Ok(None) => break,
                Err(err) if report.processed() == 0 => return Err(err),
                Err(err) => {
                    warn!(error = %err, "Claim failed mid-drain; stopping pass");
                    break;
                }
            };

            if run.succeeded() {
                report.completed.push(run.job_id);
            } else {
                report.failed.push(run.job_id);
            }
        }

        if report.processed() > 0 {
            info!(
                completed = report.completed.len(),
                failed = report.failed.len(),
                "Background job pass finished"
            );
        }
        Ok(report)
    }

    fn executor_for(&self, job: &BackgroundJob) -> Result<RetryExecutor> {
        let config = RetryConfig::builder()
            .max_retries(job.max_retries)
            .timeout(self.processing_timeout)
            .build()
            .map_err(config_error)?;
        Ok(RetryExecutor::new(config))
    }
}
