//! PostgreSQL-backed webhook outbox store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qrgen_core::WebhookOutboxStore;
use qrgen_domain::{
    QrGenError, Result as DomainResult, WebhookOutboxEntry, WebhookStatus, WebhookStatusSummary,
};
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::warn;

use super::client::{map_pg_error, to_i32, to_u32, PgDatabase};

pub struct PgWebhookOutboxRepository {
    db: PgDatabase,
}

impl PgWebhookOutboxRepository {
    pub fn new(db: PgDatabase) -> Self {
        Self { db }
    }

    async fn execute_for_entry(
        &self,
        id: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> DomainResult<()> {
        let changed = self.db.client().execute(sql, params).await.map_err(map_pg_error)?;
        if changed == 0 {
            return Err(QrGenError::NotFound(format!("webhook outbox entry {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookOutboxStore for PgWebhookOutboxRepository {
    async fn insert_entry(&self, entry: &WebhookOutboxEntry) -> DomainResult<()> {
        let response_status = entry.response_status.map(i32::from);
        self.db
            .client()
            .execute(
                "INSERT INTO webhook_outbox (
                    id, qr_code_id, webhook_url, payload, secret, status, attempts, max_attempts,
                    next_retry_at, last_attempt_at, last_error, delivered_at, response_status,
                    response_body, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
                &[
                    &entry.id,
                    &entry.qr_code_id,
                    &entry.webhook_url,
                    &entry.payload,
                    &entry.secret,
                    &entry.status.as_str(),
                    &to_i32(entry.attempts),
                    &to_i32(entry.max_attempts),
                    &entry.next_retry_at,
                    &entry.last_attempt_at,
                    &entry.last_error,
                    &entry.delivered_at,
                    &response_status,
                    &entry.response_body,
                    &entry.created_at,
                    &entry.updated_at,
                ],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }

    async fn claim_next_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<WebhookOutboxEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .db
            .client()
            .query(OUTBOX_CLAIM_SQL, &[&now, &limit])
            .await
            .map_err(map_pg_error)?;

        let mut claimed = rows.iter().map(map_outbox_row).collect::<DomainResult<Vec<_>>>()?;
        claimed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(claimed)
    }

    async fn begin_attempt(&self, id: &str, now: DateTime<Utc>) -> DomainResult<()> {
        self.execute_for_entry(
            id,
            "UPDATE webhook_outbox
             SET status = 'processing', attempts = attempts + 1,
                 last_attempt_at = $2, updated_at = $2
             WHERE id = $1",
            &[&id, &now],
        )
        .await
    }

    async fn mark_delivered(
        &self,
        id: &str,
        response_status: u16,
        response_body: Option<&str>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let response_status = i32::from(response_status);
        self.execute_for_entry(
            id,
            "UPDATE webhook_outbox
             SET status = 'delivered', response_status = $2, response_body = $3,
                 delivered_at = $4, updated_at = $4
             WHERE id = $1",
            &[&id, &response_status, &response_body, &now],
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.execute_for_entry(
            id,
            "UPDATE webhook_outbox
             SET status = 'failed', last_error = $2, next_retry_at = $3, updated_at = $4
             WHERE id = $1",
            &[&id, &error, &next_retry_at, &now],
        )
        .await
    }

    async fn status_summary(&self, qr_code_id: &str) -> DomainResult<WebhookStatusSummary> {
        let rows = self
            .db
            .client()
            .query(
                "SELECT status, COUNT(*)::BIGINT AS count FROM webhook_outbox
                 WHERE qr_code_id = $1 GROUP BY status",
                &[&qr_code_id],
            )
            .await
            .map_err(map_pg_error)?;

        let mut summary = WebhookStatusSummary::default();
        for row in rows {
            let raw: String = row.try_get("status").map_err(map_pg_error)?;
            let count: i64 = row.try_get("count").map_err(map_pg_error)?;
            match raw.parse::<WebhookStatus>() {
                Ok(status) => summary.add(status, u64::try_from(count).unwrap_or(0)),
                Err(err) => warn!(
                    qr_code_id,
                    raw_status = %raw,
                    error = %err,
                    "skipping unknown webhook status in summary"
                ),
            }
        }
        Ok(summary)
    }

    async fn get_entry(&self, id: &str) -> DomainResult<Option<WebhookOutboxEntry>> {
        let row = self
            .db
            .client()
            .query_opt(&format!("SELECT {OUTBOX_COLUMNS} FROM webhook_outbox WHERE id = $1"), &[&id])
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(map_outbox_row).transpose()
    }

    async fn release_stale_entries(
        &self,
        claimed_before: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<u64> {
        self.db
            .client()
            .execute(
                "UPDATE webhook_outbox
                 SET status = 'failed', last_error = $3, next_retry_at = $2, updated_at = $2
                 WHERE status = 'processing' AND updated_at < $1",
                &[&claimed_before, &now, &error],
            )
            .await
            .map_err(map_pg_error)
    }
}

const OUTBOX_COLUMNS: &str = "id, qr_code_id, webhook_url, payload, secret, status, attempts, \
    max_attempts, next_retry_at, last_attempt_at, last_error, delivered_at, response_status, \
    response_body, created_at, updated_at";

const OUTBOX_CLAIM_SQL: &str = "UPDATE webhook_outbox
    SET status = 'processing', updated_at = $1
    WHERE id IN (
        SELECT id FROM webhook_outbox
        WHERE (status = 'pending' OR (status = 'failed' AND attempts < max_attempts))
          AND next_retry_at <= $1
        ORDER BY created_at ASC
        LIMIT $2
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, qr_code_id, webhook_url, payload, secret, status, attempts,
        max_attempts, next_retry_at, last_attempt_at, last_error, delivered_at, response_status,
        response_body, created_at, updated_at";

fn map_outbox_row(row: &Row) -> DomainResult<WebhookOutboxEntry> {
    let id: String = row.try_get("id").map_err(map_pg_error)?;
    let status_raw: String = row.try_get("status").map_err(map_pg_error)?;
    let status = status_raw.parse::<WebhookStatus>().unwrap_or_else(|err| {
        warn!(entry_id = %id, raw_status = %status_raw, error = %err, "invalid webhook status, using pending");
        WebhookStatus::Pending
    });
    let response_status: Option<i32> = row.try_get("response_status").map_err(map_pg_error)?;
    let response_status = response_status
        .map(u16::try_from)
        .transpose()
        .map_err(|e| QrGenError::Database(format!("entry {id}: invalid response status: {e}")))?;

    Ok(WebhookOutboxEntry {
        qr_code_id: row.try_get("qr_code_id").map_err(map_pg_error)?,
        webhook_url: row.try_get("webhook_url").map_err(map_pg_error)?,
        payload: row.try_get("payload").map_err(map_pg_error)?,
        secret: row.try_get("secret").map_err(map_pg_error)?,
        status,
        attempts: to_u32(row.try_get("attempts").map_err(map_pg_error)?),
        max_attempts: to_u32(row.try_get("max_attempts").map_err(map_pg_error)?),
        next_retry_at: row.try_get("next_retry_at").map_err(map_pg_error)?,
        last_attempt_at: row.try_get("last_attempt_at").map_err(map_pg_error)?,
        last_error: row.try_get("last_error").map_err(map_pg_error)?,
        delivered_at: row.try_get("delivered_at").map_err(map_pg_error)?,
        response_status,
        response_body: row.try_get("response_body").map_err(map_pg_error)?,
        created_at: row.try_get("created_at").map_err(map_pg_error)?,
        updated_at: row.try_get("updated_at").map_err(map_pg_error)?,
        id,
    })
}
