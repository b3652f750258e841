//! PostgreSQL-backed job store

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use qrgen_core::JobStore;
use qrgen_domain::{BackgroundJob, JobStatus, JobType, QrGenError, Result as DomainResult};
use serde_json::Value;
use tokio_postgres::Row;
use tracing::warn;

use super::client::{map_pg_error, to_i32, to_u32, PgDatabase};

pub struct PgJobRepository {
    db: PgDatabase,
}

impl PgJobRepository {
    pub fn new(db: PgDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for PgJobRepository {
    async fn insert_job(&self, job: &BackgroundJob) -> DomainResult<()> {
        self.db
            .client()
            .execute(
                "INSERT INTO background_jobs (
                    id, job_type, status, priority, payload, result, error, retries,
                    max_retries, run_after, started_at, completed_at, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                &[
                    &job.id,
                    &job.job_type.as_str(),
                    &job.status.as_str(),
                    &job.priority,
                    &job.payload,
                    &job.result,
                    &job.error,
                    &to_i32(job.retries),
                    &to_i32(job.max_retries),
                    &job.run_after,
                    &job.started_at,
                    &job.completed_at,
                    &job.created_at,
                    &job.updated_at,
                ],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }

    async fn claim_next_job(&self, now: DateTime<Utc>) -> DomainResult<Option<BackgroundJob>> {
        let row = self
            .db
            .client()
            .query_opt(JOB_CLAIM_SQL, &[&now])
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(map_job_row).transpose()
    }

    async fn complete_job(&self, id: &str, result: &Value, now: DateTime<Utc>) -> DomainResult<()> {
        let changed = self
            .db
            .client()
            .execute(
                "UPDATE background_jobs
                 SET status = 'completed', result = $2, completed_at = $3, updated_at = $3
                 WHERE id = $1",
                &[&id, result, &now],
            )
            .await
            .map_err(map_pg_error)?;
        if changed == 0 {
            return Err(QrGenError::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    async fn fail_job(
        &self,
        id: &str,
        error: &str,
        now: DateTime<Utc>,
        backoff_base: Duration,
    ) -> DomainResult<BackgroundJob> {
        let backoff_ms = backoff_base.num_milliseconds();
        let row = self
            .db
            .client()
            .query_opt(JOB_FAIL_SQL, &[&id, &now, &backoff_ms, &error])
            .await
            .map_err(map_pg_error)?;
        match row {
            Some(row) => map_job_row(&row),
            None => Err(QrGenError::NotFound(format!("job {id}"))),
        }
    }

    async fn get_job(&self, id: &str) -> DomainResult<Option<BackgroundJob>> {
        let row = self
            .db
            .client()
            .query_opt(&format!("SELECT {JOB_COLUMNS} FROM background_jobs WHERE id = $1"), &[&id])
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(map_job_row).transpose()
    }

    async fn release_stale_jobs(
        &self,
        claimed_before: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<u64> {
        self.db
            .client()
            .execute(JOB_RELEASE_STALE_SQL, &[&claimed_before, &now, &error])
            .await
            .map_err(map_pg_error)
    }
}

const JOB_COLUMNS: &str = "id, job_type, status, priority, payload, result, error, retries, \
    max_retries, run_after, started_at, completed_at, created_at, updated_at";

const JOB_CLAIM_SQL: &str = "UPDATE background_jobs
    SET status = 'processing', started_at = $1, updated_at = $1
    WHERE id = (
        SELECT id FROM background_jobs
        WHERE status = 'pending' AND run_after <= $1
        ORDER BY priority DESC, run_after ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, job_type, status, priority, payload, result, error, retries,
        max_retries, run_after, started_at, completed_at, created_at, updated_at";

const JOB_FAIL_SQL: &str = "UPDATE background_jobs
    SET status = CASE WHEN retries < max_retries THEN 'pending' ELSE 'failed' END,
        run_after = CASE WHEN retries < max_retries
            THEN $2::TIMESTAMPTZ + ($3::BIGINT * (retries + 1)) * INTERVAL '1 millisecond'
            ELSE run_after END,
        retries = CASE WHEN retries < max_retries THEN retries + 1 ELSE retries END,
        error = $4,
        updated_at = $2
    WHERE id = $1
    RETURNING id, job_type, status, priority, payload, result, error, retries,
        max_retries, run_after, started_at, completed_at, created_at, updated_at";

const JOB_RELEASE_STALE_SQL: &str = "UPDATE background_jobs
    SET status = CASE WHEN retries < max_retries THEN 'pending' ELSE 'failed' END,
        retries = CASE WHEN retries < max_retries THEN retries + 1 ELSE retries END,
        run_after = CASE WHEN retries < max_retries THEN $2::TIMESTAMPTZ ELSE run_after END,
        error = $3,
        updated_at = $2
    WHERE status = 'processing' AND started_at < $1";

fn map_job_row(row: &Row) -> DomainResult<BackgroundJob> {
    let id: String = row.try_get("id").map_err(map_pg_error)?;
    let job_type_raw: String = row.try_get("job_type").map_err(map_pg_error)?;
    let job_type = job_type_raw
        .parse::<JobType>()
        .map_err(|e| QrGenError::Database(format!("job {id}: {e}")))?;
    let status_raw: String = row.try_get("status").map_err(map_pg_error)?;
    let status = status_raw.parse::<JobStatus>().unwrap_or_else(|err| {
        warn!(job_id = %id, raw_status = %status_raw, error = %err, "invalid job status, using pending");
        JobStatus::Pending
    });

    Ok(BackgroundJob {
        job_type,
        status,
        priority: row.try_get("priority").map_err(map_pg_error)?,
        payload: row.try_get("payload").map_err(map_pg_error)?,
        result: row.try_get("result").map_err(map_pg_error)?,
        error: row.try_get("error").map_err(map_pg_error)?,
        retries: to_u32(row.try_get("retries").map_err(map_pg_error)?),
        max_retries: to_u32(row.try_get("max_retries").map_err(map_pg_error)?),
        run_after: row.try_get("run_after").map_err(map_pg_error)?,
        started_at: row.try_get("started_at").map_err(map_pg_error)?,
        completed_at: row.try_get("completed_at").map_err(map_pg_error)?,
        created_at: row.try_get("created_at").map_err(map_pg_error)?,
        updated_at: row.try_get("updated_at").map_err(map_pg_error)?,
        id,
    })
}
