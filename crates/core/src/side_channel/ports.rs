//! Port interface for the audit trail

use async_trait::async_trait;
use qrgen_domain::{AuditEvent, Result};

/// Destination for audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one audit event
    async fn record(&self, event: &AuditEvent) -> Result<()>;
}
