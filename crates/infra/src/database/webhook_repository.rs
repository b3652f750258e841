//! SQLite-backed implementation of the webhook outbox store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qrgen_core::WebhookOutboxStore;
use qrgen_domain::{
    QrGenError, Result as DomainResult, WebhookOutboxEntry, WebhookStatus, WebhookStatusSummary,
};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tracing::warn;

use super::codec::{
    json_column, json_text, map_sql_error, millis_column, optional_millis_column, parse_status,
    to_millis, usize_to_i64, with_connection,
};
use super::manager::DbManager;

pub struct SqliteWebhookOutboxRepository {
    db: Arc<DbManager>,
}

impl SqliteWebhookOutboxRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    async fn execute_for_entry(
        &self,
        id: &str,
        sql: &'static str,
        params: Vec<rusqlite::types::Value>,
    ) -> DomainResult<()> {
        let id = id.to_string();
        with_connection(&self.db, move |conn| {
            let mut bound = vec![rusqlite::types::Value::Text(id.clone())];
            bound.extend(params);
            let changed = conn
                .execute(sql, rusqlite::params_from_iter(bound))
                .map_err(map_sql_error)?;
            if changed == 0 {
                return Err(QrGenError::NotFound(format!("webhook outbox entry {id}")));
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl WebhookOutboxStore for SqliteWebhookOutboxRepository {
    async fn insert_entry(&self, entry: &WebhookOutboxEntry) -> DomainResult<()> {
        let entry = entry.clone();
        with_connection(&self.db, move |conn| {
            conn.execute(
                OUTBOX_INSERT_SQL,
                params![
                    entry.id,
                    entry.qr_code_id,
                    entry.webhook_url,
                    json_text(&entry.payload),
                    entry.secret,
                    entry.status.as_str(),
                    entry.attempts,
                    entry.max_attempts,
                    to_millis(entry.next_retry_at),
                    entry.last_attempt_at.map(to_millis),
                    entry.last_error,
                    entry.delivered_at.map(to_millis),
                    entry.response_status,
                    entry.response_body,
                    to_millis(entry.created_at),
                    to_millis(entry.updated_at),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn claim_next_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<WebhookOutboxEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let limit = usize_to_i64(limit);
        let now = to_millis(now);
        let mut claimed = with_connection(&self.db, move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sql_error)?;
            let entries = {
                let mut stmt = tx.prepare(OUTBOX_CLAIM_SQL).map_err(map_sql_error)?;
                let rows = stmt
                    .query_map(params![now, limit], map_outbox_row)
                    .map_err(map_sql_error)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(map_sql_error)?;
                rows
            };
            tx.commit().map_err(map_sql_error)?;
            Ok(entries)
        })
        .await?;

        // RETURNING order is unspecified
        claimed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(claimed)
    }

    async fn begin_attempt(&self, id: &str, now: DateTime<Utc>) -> DomainResult<()> {
        self.execute_for_entry(
            id,
            "UPDATE webhook_outbox
             SET status = 'processing', attempts = attempts + 1,
                 last_attempt_at = ?2, updated_at = ?2
             WHERE id = ?1",
            vec![to_millis(now).into()],
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
        self.execute_for_entry(
            id,
            "UPDATE webhook_outbox
             SET status = 'delivered', response_status = ?2, response_body = ?3,
                 delivered_at = ?4, updated_at = ?4
             WHERE id = ?1",
            vec![
                i64::from(response_status).into(),
                response_body.map(str::to_string).into(),
                to_millis(now).into(),
            ],
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
             SET status = 'failed', last_error = ?2, next_retry_at = ?3, updated_at = ?4
             WHERE id = ?1",
            vec![error.to_string().into(), to_millis(next_retry_at).into(), to_millis(now).into()],
        )
        .await
    }

    async fn status_summary(&self, qr_code_id: &str) -> DomainResult<WebhookStatusSummary> {
        let qr_code_id = qr_code_id.to_string();
        with_connection(&self.db, move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT status, COUNT(*) FROM webhook_outbox
                     WHERE qr_code_id = ?1 GROUP BY status",
                )
                .map_err(map_sql_error)?;
            let counts = stmt
                .query_map(params![qr_code_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;

            let mut summary = WebhookStatusSummary::default();
            for (raw, count) in counts {
                match raw.parse::<WebhookStatus>() {
                    Ok(status) => summary.add(status, u64::try_from(count).unwrap_or(0)),
                    Err(err) => warn!(
                        qr_code_id = %qr_code_id,
                        raw_status = %raw,
                        error = %err,
                        "skipping unknown webhook status in summary"
                    ),
                }
            }
            Ok(summary)
        })
        .await
    }

    async fn get_entry(&self, id: &str) -> DomainResult<Option<WebhookOutboxEntry>> {
        let id = id.to_string();
        with_connection(&self.db, move |conn| {
            conn.query_row(
                &format!("SELECT {OUTBOX_COLUMNS} FROM webhook_outbox WHERE id = ?1"),
                params![id],
                map_outbox_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
    }

    async fn release_stale_entries(
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
                .execute(
                    "UPDATE webhook_outbox
                     SET status = 'failed', last_error = ?3, next_retry_at = ?2, updated_at = ?2
                     WHERE status = 'processing' AND updated_at < ?1",
                    params![claimed_before, now, error],
                )
                .map_err(map_sql_error)?;
            Ok(released as u64)
        })
        .await
    }
}

const OUTBOX_COLUMNS: &str = "id, qr_code_id, webhook_url, payload, secret, status, attempts, \
    max_attempts, next_retry_at, last_attempt_at, last_error, delivered_at, response_status, \
    response_body, created_at, updated_at";

const OUTBOX_INSERT_SQL: &str = "INSERT INTO webhook_outbox (
        id, qr_code_id, webhook_url, payload, secret, status, attempts, max_attempts,
        next_retry_at, last_attempt_at, last_error, delivered_at, response_status,
        response_body, created_at, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)";

const OUTBOX_CLAIM_SQL: &str = "UPDATE webhook_outbox
    SET status = 'processing', updated_at = ?1
    WHERE id IN (
        SELECT id FROM webhook_outbox
        WHERE (status = 'pending' OR (status = 'failed' AND attempts < max_attempts))
          AND next_retry_at <= ?1
        ORDER BY created_at ASC
        LIMIT ?2
    )
    RETURNING id, qr_code_id, webhook_url, payload, secret, status, attempts,
        max_attempts, next_retry_at, last_attempt_at, last_error, delivered_at, response_status,
        response_body, created_at, updated_at";

fn map_outbox_row(row: &Row<'_>) -> rusqlite::Result<WebhookOutboxEntry> {
    let id: String = row.get(0)?;
    let status_raw: String = row.get(5)?;
    let status = parse_status("webhook_outbox", &id, &status_raw, WebhookStatus::Pending);
    let response_status = row
        .get::<_, Option<i64>>(12)?
        .map(|code| {
            u16::try_from(code).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(12, Type::Integer, Box::new(e))
            })
        })
        .transpose()?;

    Ok(WebhookOutboxEntry {
        id,
        qr_code_id: row.get(1)?,
        webhook_url: row.get(2)?,
        payload: json_column(row, 3)?,
        secret: row.get(4)?,
        status,
        attempts: row.get(6)?,
        max_attempts: row.get(7)?,
        next_retry_at: millis_column(row, 8)?,
        last_attempt_at: optional_millis_column(row, 9)?,
        last_error: row.get(10)?,
        delivered_at: optional_millis_column(row, 11)?,
        response_status,
        response_body: row.get(13)?,
        created_at: millis_column(row, 14)?,
        updated_at: millis_column(row, 15)?,
    })
}
