//! Audit trail records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One audit log line. Writing these is best-effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Verb-like action name, e.g. `job.failed`
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub metadata: Option<Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn success(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id,
            metadata: None,
            success: true,
            error_message: None,
            created_at: now,
        }
    }

    pub fn failure(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: Option<String>,
        error_message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id,
            metadata: None,
            success: false,
            error_message: Some(error_message.into()),
            created_at: now,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
