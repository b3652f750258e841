//! PostgreSQL audit trail

use async_trait::async_trait;
use qrgen_core::AuditSink;
use qrgen_domain::{AuditEvent, Result as DomainResult};

use super::client::{map_pg_error, PgDatabase};

pub struct PgAuditRepository {
    db: PgDatabase,
}

impl PgAuditRepository {
    pub fn new(db: PgDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for PgAuditRepository {
    async fn record(&self, event: &AuditEvent) -> DomainResult<()> {
        self.db
            .client()
            .execute(
                "INSERT INTO audit_log (
                    action, resource_type, resource_id, metadata, success, error_message, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &event.action,
                    &event.resource_type,
                    &event.resource_id,
                    &event.metadata,
                    &event.success,
                    &event.error_message,
                    &event.created_at,
                ],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }
}
