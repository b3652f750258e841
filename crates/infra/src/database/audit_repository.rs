//! SQLite audit trail

use std::sync::Arc;

use async_trait::async_trait;
use qrgen_core::AuditSink;
use qrgen_domain::{AuditEvent, Result as DomainResult};
use rusqlite::params;

use super::codec::{json_text, map_sql_error, to_millis, with_connection};
use super::manager::DbManager;

/// Appends audit events to the `audit_log` table.
pub struct SqliteAuditRepository {
    db: Arc<DbManager>,
}

impl SqliteAuditRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditRepository {
    async fn record(&self, event: &AuditEvent) -> DomainResult<()> {
        let event = event.clone();
        with_connection(&self.db, move |conn| {
            conn.execute(
                "INSERT INTO audit_log (
                    action, resource_type, resource_id, metadata, success, error_message, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.action,
                    event.resource_type,
                    event.resource_id,
                    event.metadata.as_ref().map(json_text),
                    event.success,
                    event.error_message,
                    to_millis(event.created_at),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn records_failure_events_with_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let manager =
            DbManager::new(temp_dir.path().join("audit.db"), 2, std::time::Duration::from_secs(5))
                .unwrap();
        manager.run_migrations().unwrap();
        let manager = Arc::new(manager);
        let repo = SqliteAuditRepository::new(Arc::clone(&manager));

        let event = AuditEvent::failure(
            "webhook.exhausted",
            "webhook_outbox",
            Some("entry-1".into()),
            "HTTP 500",
            Utc::now(),
        )
        .with_metadata(json!({"attempts": 5}));
        repo.record(&event).await.unwrap();

        let conn = manager.get_connection().unwrap();
        let (action, success, metadata): (String, bool, String) = conn
            .query_row("SELECT action, success, metadata FROM audit_log", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .unwrap();
        assert_eq!(action, "webhook.exhausted");
        assert!(!success);
        assert_eq!(serde_json::from_str::<serde_json::Value>(&metadata).unwrap(), json!({"attempts": 5}));
    }
}
