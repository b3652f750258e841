//! In-memory store implementations

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use qrgen_core::{AuditSink, DataStore, Filter, JobStore, Row, WebhookOutboxStore};
use qrgen_domain::{
    AuditEvent, BackgroundJob, JobFailureOutcome, JobStatus, QrGenError, Result as DomainResult,
    WebhookOutboxEntry, WebhookStatus, WebhookStatusSummary,
};
use serde_json::Value;

/// Table store that can be told to fail or stall its next calls
#[derive(Default, Clone)]
pub struct FlakyDataStore {
    tables: Arc<Mutex<HashMap<String, Vec<Row>>>>,
    failures_left: Arc<AtomicU32>,
    stall: Arc<Mutex<Option<StdDuration>>>,
    calls: Arc<AtomicU32>,
}

impl FlakyDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with a database error
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Sleep this long inside every call
    pub fn stall_for(&self, duration: StdDuration) {
        *self.stall.lock().unwrap() = Some(duration);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.lock().unwrap().get(table).cloned().unwrap_or_default()
    }

    async fn enter(&self) -> DomainResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stall = *self.stall.lock().unwrap();
        if let Some(duration) = stall {
            tokio::time::sleep(duration).await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(QrGenError::Database("connection reset by peer".into()));
        }
        Ok(())
    }
}

fn matches(row: &Row, filter: &Filter) -> bool {
    filter.iter().all(|(column, value)| row.get(column) == Some(value))
}

#[async_trait]
impl DataStore for FlakyDataStore {
    async fn select(&self, table: &str, filter: &Filter) -> DomainResult<Vec<Row>> {
        self.enter().await?;
        Ok(self.rows(table).into_iter().filter(|row| matches(row, filter)).collect())
    }

    async fn insert(&self, table: &str, row: Row) -> DomainResult<Row> {
        self.enter().await?;
        self.tables.lock().unwrap().entry(table.to_string()).or_default().push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, changes: Row, filter: &Filter) -> DomainResult<Vec<Row>> {
        self.enter().await?;
        let mut tables = self.tables.lock().unwrap();
        let mut updated = Vec::new();
        for row in tables.entry(table.to_string()).or_default().iter_mut() {
            if matches(row, filter) {
                for (column, value) in &changes {
                    row.insert(column.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> DomainResult<u64> {
        self.enter().await?;
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        let before = rows.len();
        rows.retain(|row| !matches(row, filter));
        Ok((before - rows.len()) as u64)
    }
}

/// Job store with the same claim and failure rules as the SQL stores
#[derive(Default, Clone)]
pub struct InMemoryJobStore {
    jobs: Arc<Mutex<Vec<BackgroundJob>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(&self, id: &str) -> BackgroundJob {
        self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned().unwrap()
    }

    /// Pull a rescheduled job's `run_after` into the past
    pub fn make_due(&self, id: &str) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            job.run_after = Utc::now() - Duration::seconds(1);
        }
    }

    /// Move a claim's `started_at` back by `age`
    pub fn age_claim(&self, id: &str, age: Duration) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            job.started_at = job.started_at.map(|at| at - age);
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_job(&self, job: &BackgroundJob) -> DomainResult<()> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }

    async fn claim_next_job(&self, now: DateTime<Utc>) -> DomainResult<Option<BackgroundJob>> {
        let mut jobs = self.jobs.lock().unwrap();
        let next = jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending && j.run_after <= now)
            .max_by(|a, b| a.priority.cmp(&b.priority).then(b.run_after.cmp(&a.run_after)));

        Ok(next.map(|job| {
            job.status = JobStatus::Processing;
            job.started_at = Some(now);
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn complete_job(&self, id: &str, result: &Value, now: DateTime<Utc>) -> DomainResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| QrGenError::NotFound(format!("job {id}")))?;
        job.status = JobStatus::Completed;
        job.result = Some(result.clone());
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn fail_job(
        &self,
        id: &str,
        error: &str,
        now: DateTime<Utc>,
        backoff_base: Duration,
    ) -> DomainResult<BackgroundJob> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| QrGenError::NotFound(format!("job {id}")))?;

        match job.failure_outcome(now, backoff_base) {
            JobFailureOutcome::Rescheduled { retries, run_after } => {
                job.status = JobStatus::Pending;
                job.retries = retries;
                job.run_after = run_after;
            }
            JobFailureOutcome::Exhausted => job.status = JobStatus::Failed,
        }
        job.error = Some(error.to_string());
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn get_job(&self, id: &str) -> DomainResult<Option<BackgroundJob>> {
        Ok(self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned())
    }

    async fn release_stale_jobs(
        &self,
        claimed_before: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut released = 0;
        let stale = |j: &&mut BackgroundJob| {
            j.status == JobStatus::Processing && j.started_at.is_some_and(|at| at < claimed_before)
        };
        for job in jobs.iter_mut().filter(stale) {
            match job.failure_outcome(now, Duration::zero()) {
                JobFailureOutcome::Rescheduled { retries, run_after } => {
                    job.status = JobStatus::Pending;
                    job.retries = retries;
                    job.run_after = run_after;
                }
                JobFailureOutcome::Exhausted => job.status = JobStatus::Failed,
            }
            job.error = Some(error.to_string());
            job.updated_at = now;
            released += 1;
        }
        Ok(released)
    }
}

/// Outbox store with the same claim rules as the SQL stores
#[derive(Default, Clone)]
pub struct InMemoryOutboxStore {
    entries: Arc<Mutex<Vec<WebhookOutboxEntry>>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, id: &str) -> WebhookOutboxEntry {
        self.entries.lock().unwrap().iter().find(|e| e.id == id).cloned().unwrap()
    }

    pub fn entries(&self) -> Vec<WebhookOutboxEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn make_due(&self, id: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.next_retry_at = Utc::now() - Duration::seconds(1);
        }
    }

    /// Move an entry's `updated_at` back by `age`
    pub fn age_claim(&self, id: &str, age: Duration) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.updated_at = entry.updated_at - age;
        }
    }
}

fn is_due(entry: &WebhookOutboxEntry, now: DateTime<Utc>) -> bool {
    let eligible = match entry.status {
        WebhookStatus::Pending => true,
        WebhookStatus::Failed => entry.attempts < entry.max_attempts,
        WebhookStatus::Processing | WebhookStatus::Delivered => false,
    };
    eligible && entry.next_retry_at <= now
}

#[async_trait]
impl WebhookOutboxStore for InMemoryOutboxStore {
    async fn insert_entry(&self, entry: &WebhookOutboxEntry) -> DomainResult<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn claim_next_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<WebhookOutboxEntry>> {
        let mut entries = self.entries.lock().unwrap();
        let mut due: Vec<&mut WebhookOutboxEntry> =
            entries.iter_mut().filter(|e| is_due(e, now)).collect();
        due.sort_by_key(|e| e.created_at);

        Ok(due
            .into_iter()
            .take(limit)
            .map(|entry| {
                entry.status = WebhookStatus::Processing;
                entry.updated_at = now;
                entry.clone()
            })
            .collect())
    }

    async fn begin_attempt(&self, id: &str, now: DateTime<Utc>) -> DomainResult<()> {
        self.update(id, |entry| {
            entry.status = WebhookStatus::Processing;
            entry.attempts += 1;
            entry.last_attempt_at = Some(now);
            entry.updated_at = now;
        })
    }

    async fn mark_delivered(
        &self,
        id: &str,
        response_status: u16,
        response_body: Option<&str>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.update(id, |entry| {
            entry.status = WebhookStatus::Delivered;
            entry.response_status = Some(response_status);
            entry.response_body = response_body.map(str::to_string);
            entry.delivered_at = Some(now);
            entry.updated_at = now;
        })
    }

    async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.update(id, |entry| {
            entry.status = WebhookStatus::Failed;
            entry.last_error = Some(error.to_string());
            entry.next_retry_at = next_retry_at;
            entry.updated_at = now;
        })
    }

    async fn status_summary(&self, qr_code_id: &str) -> DomainResult<WebhookStatusSummary> {
        let mut summary = WebhookStatusSummary::default();
        for entry in self.entries.lock().unwrap().iter().filter(|e| e.qr_code_id == qr_code_id) {
            summary.add(entry.status, 1);
        }
        Ok(summary)
    }

    async fn get_entry(&self, id: &str) -> DomainResult<Option<WebhookOutboxEntry>> {
        Ok(self.entries.lock().unwrap().iter().find(|e| e.id == id).cloned())
    }

    async fn release_stale_entries(
        &self,
        claimed_before: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<u64> {
        let mut entries = self.entries.lock().unwrap();
        let mut released = 0;
        for entry in entries
            .iter_mut()
            .filter(|e| e.status == WebhookStatus::Processing && e.updated_at < claimed_before)
        {
            entry.status = WebhookStatus::Failed;
            entry.last_error = Some(error.to_string());
            entry.next_retry_at = now;
            entry.updated_at = now;
            released += 1;
        }
        Ok(released)
    }
}

impl InMemoryOutboxStore {
    fn update(&self, id: &str, apply: impl FnOnce(&mut WebhookOutboxEntry)) -> DomainResult<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| QrGenError::NotFound(format!("webhook outbox entry {id}")))?;
        apply(entry);
        Ok(())
    }
}

/// Audit sink that keeps every event
#[derive(Default, Clone)]
pub struct RecordingAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: &AuditEvent) -> DomainResult<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
