//! SQLite-backed implementation of the background job store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use qrgen_core::JobStore;
use qrgen_domain::{BackgroundJob, JobStatus, JobType, QrGenError, Result as DomainResult};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;

use super::codec::{
    json_column, json_text, map_sql_error, millis_column, optional_json_column,
    optional_millis_column, parse_status, to_millis, with_connection,
};
use super::manager::DbManager;

pub struct SqliteJobRepository {
    db: Arc<DbManager>,
}

impl SqliteJobRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for SqliteJobRepository {
    async fn insert_job(&self, job: &BackgroundJob) -> DomainResult<()> {
        let job = job.clone();
        with_connection(&self.db, move |conn| {
            conn.execute(
                JOB_INSERT_SQL,
                params![
                    job.id,
                    job.job_type.as_str(),
                    job.status.as_str(),
                    job.priority,
                    json_text(&job.payload),
                    job.result.as_ref().map(json_text),
                    job.error,
                    job.retries,
                    job.max_retries,
                    to_millis(job.run_after),
                    job.started_at.map(to_millis),
                    job.completed_at.map(to_millis),
                    to_millis(job.created_at),
                    to_millis(job.updated_at),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn claim_next_job(&self, now: DateTime<Utc>) -> DomainResult<Option<BackgroundJob>> {
        let now = to_millis(now);
        with_connection(&self.db, move |conn| {
            // IMMEDIATE takes the write lock up front so a competing claim
            // waits on busy_timeout instead of failing its snapshot upgrade.
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sql_error)?;
            let claimed = tx
                .query_row(JOB_CLAIM_SQL, params![now], map_job_row)
                .optional()
                .map_err(map_sql_error)?;
            tx.commit().map_err(map_sql_error)?;
            Ok(claimed)
        })
        .await
    }

    async fn complete_job(&self, id: &str, result: &Value, now: DateTime<Utc>) -> DomainResult<()> {
        let id = id.to_string();
        let result = json_text(result);
        let now = to_millis(now);
        with_connection(&self.db, move |conn| {
            let changed = conn
                .execute(
                    "UPDATE background_jobs
                     SET status = 'completed', result = ?2, completed_at = ?3, updated_at = ?3
                     WHERE id = ?1",
                    params![id, result, now],
                )
                .map_err(map_sql_error)?;
            if changed == 0 {
                return Err(QrGenError::NotFound(format!("job {id}")));
            }
            Ok(())
        })
        .await
    }

    async fn fail_job(
        &self,
        id: &str,
        error: &str,
        now: DateTime<Utc>,
        backoff_base: Duration,
    ) -> DomainResult<BackgroundJob> {
        let id = id.to_string();
        let error = error.to_string();
        let now = to_millis(now);
        let backoff_ms = backoff_base.num_milliseconds();
        with_connection(&self.db, move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sql_error)?;
            let job = tx
                .query_row(JOB_FAIL_SQL, params![id, now, backoff_ms, error], map_job_row)
                .optional()
                .map_err(map_sql_error)?;
            tx.commit().map_err(map_sql_error)?;
            job.ok_or_else(|| QrGenError::NotFound(format!("job {id}")))
        })
        .await
    }

    async fn get_job(&self, id: &str) -> DomainResult<Option<BackgroundJob>> {
        let id = id.to_string();
        with_connection(&self.db, move |conn| {
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM background_jobs WHERE id = ?1"),
                params![id],
                map_job_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
    }

    async fn release_stale_jobs(
        &self,
        claimed_before: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<u64> {
        let claimed_before = to_millis(claimed_before);
        let error = error.to_string();
        let now = to_millis(now);
        with_connection(&self.db, move |conn| {
            let released = conn
                .execute(JOB_RELEASE_STALE_SQL, params![claimed_before, now, error])
                .map_err(map_sql_error)?;
            Ok(released as u64)
        })
        .await
    }
}

const JOB_COLUMNS: &str = "id, job_type, status, priority, payload, result, error, retries, \
    max_retries, run_after, started_at, completed_at, created_at, updated_at";

const JOB_INSERT_SQL: &str = "INSERT INTO background_jobs (
        id, job_type, status, priority, payload, result, error, retries,
        max_retries, run_after, started_at, completed_at, created_at, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)";

const JOB_CLAIM_SQL: &str = "UPDATE background_jobs
    SET status = 'processing', started_at = ?1, updated_at = ?1
    WHERE id = (
        SELECT id FROM background_jobs
        WHERE status = 'pending' AND run_after <= ?1
        ORDER BY priority DESC, run_after ASC
        LIMIT 1
    ) AND status = 'pending'
    RETURNING id, job_type, status, priority, payload, result, error, retries,
        max_retries, run_after, started_at, completed_at, created_at, updated_at";

// SET expressions all read the pre-update row.
const JOB_FAIL_SQL: &str = "UPDATE background_jobs
    SET status = CASE WHEN retries < max_retries THEN 'pending' ELSE 'failed' END,
        run_after = CASE WHEN retries < max_retries
            THEN ?2 + ?3 * (retries + 1) ELSE run_after END,
        retries = CASE WHEN retries < max_retries THEN retries + 1 ELSE retries END,
        error = ?4,
        updated_at = ?2
    WHERE id = ?1
    RETURNING id, job_type, status, priority, payload, result, error, retries,
        max_retries, run_after, started_at, completed_at, created_at, updated_at";

const JOB_RELEASE_STALE_SQL: &str = "UPDATE background_jobs
    SET status = CASE WHEN retries < max_retries THEN 'pending' ELSE 'failed' END,
        retries = CASE WHEN retries < max_retries THEN retries + 1 ELSE retries END,
        run_after = CASE WHEN retries < max_retries THEN ?2 ELSE run_after END,
        error = ?3,
        updated_at = ?2
    WHERE status = 'processing' AND started_at < ?1";

fn map_job_row(row: &Row<'_>) -> rusqlite::Result<BackgroundJob> {
    let id: String = row.get(0)?;
    let job_type_raw: String = row.get(1)?;
    let job_type = job_type_raw.parse::<JobType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into())
    })?;
    let status_raw: String = row.get(2)?;
    let status = parse_status("background_jobs", &id, &status_raw, JobStatus::Pending);

    Ok(BackgroundJob {
        id,
        job_type,
        status,
        priority: row.get(3)?,
        payload: json_column(row, 4)?,
        result: optional_json_column(row, 5)?,
        error: row.get(6)?,
        retries: row.get(7)?,
        max_retries: row.get(8)?,
        run_after: millis_column(row, 9)?,
        started_at: optional_millis_column(row, 10)?,
        completed_at: optional_millis_column(row, 11)?,
        created_at: millis_column(row, 12)?,
        updated_at: millis_column(row, 13)?,
    })
}
