//! Webhook outbox records

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::{
    WEBHOOK_DEFAULT_MAX_ATTEMPTS, WEBHOOK_RETRY_BASE_DELAY_MS, WEBHOOK_RETRY_MAX_DELAY_MS,
};
use crate::errors::{QrGenError, Result};
use crate::impl_domain_status_conversions;

/// Delivery state of an outbox entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
}

impl_domain_status_conversions!(WebhookStatus {
    Pending => "pending",
    Processing => "processing",
    Delivered => "delivered",
    Failed => "failed",
});

/// A webhook delivery recorded durably before it is attempted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookOutboxEntry {
    pub id: String,
    pub qr_code_id: String,
    pub webhook_url: String,
    pub payload: Value,
    /// Signing secret; never serialized back out
    #[serde(skip_serializing, default)]
    pub secret: Option<String>,
    pub status: WebhookStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookOutboxEntry {
    /// New `pending` entry eligible for delivery at `now`.
    ///
    /// # Errors
    /// Returns `QrGenError::InvalidInput` if `webhook_url` is not an absolute
    /// http(s) URL or `qr_code_id` is empty.
    pub fn new(
        qr_code_id: impl Into<String>,
        webhook_url: impl Into<String>,
        payload: Value,
        secret: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let qr_code_id = qr_code_id.into();
        let webhook_url = webhook_url.into();

        if qr_code_id.trim().is_empty() {
            return Err(QrGenError::InvalidInput("qr_code_id must not be empty".into()));
        }
        validate_webhook_url(&webhook_url)?;

        Ok(Self {
            id: Uuid::now_v7().to_string(),
            qr_code_id,
            webhook_url,
            payload,
            secret: secret.filter(|s| !s.is_empty()),
            status: WebhookStatus::Pending,
            attempts: 0,
            max_attempts: WEBHOOK_DEFAULT_MAX_ATTEMPTS,
            next_retry_at: now,
            last_attempt_at: None,
            last_error: None,
            delivered_at: None,
            response_status: None,
            response_body: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// True once the entry can no longer be claimed
    pub fn is_terminal(&self) -> bool {
        match self.status {
            WebhookStatus::Delivered => true,
            WebhookStatus::Failed => self.attempts >= self.max_attempts,
            WebhookStatus::Pending | WebhookStatus::Processing => false,
        }
    }
}

/// Delay before a failed entry becomes claimable again.
///
/// `attempts` is the number of attempts made so far (>= 1 after a failure).
/// One minute after the first failure, doubling each time, capped at one
/// hour.
pub fn webhook_retry_delay(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let millis = WEBHOOK_RETRY_BASE_DELAY_MS
        .saturating_mul(1_i64 << exponent)
        .min(WEBHOOK_RETRY_MAX_DELAY_MS);
    Duration::milliseconds(millis)
}

fn validate_webhook_url(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| QrGenError::InvalidInput(format!("invalid webhook url '{raw}': {e}")))?;

    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Ok(()),
        scheme => Err(QrGenError::InvalidInput(format!(
            "webhook url must be http(s) with a host, got scheme '{scheme}'"
        ))),
    }
}

/// Per-status counts of outbox entries for one QR code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookStatusSummary {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
    pub delivered: u64,
    pub total: u64,
}

impl WebhookStatusSummary {
    /// Add `count` entries with `status`, keeping `total` in step
    pub fn add(&mut self, status: WebhookStatus, count: u64) {
        match status {
            WebhookStatus::Pending => self.pending += count,
            WebhookStatus::Processing => self.processing += count,
            WebhookStatus::Failed => self.failed += count,
            WebhookStatus::Delivered => self.delivered += count,
        }
        self.total += count;
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn new_entry_is_pending_and_due() {
        let entry = WebhookOutboxEntry::new(
            "qr-1",
            "https://example.com/hook",
            json!({"event": "scan"}),
            Some("s3cret".into()),
            now(),
        )
        .unwrap();

        assert_eq!(entry.status, WebhookStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.max_attempts, 5);
        assert_eq!(entry.next_retry_at, now());
        assert!(!entry.is_terminal());
    }

    #[test]
    fn empty_secret_is_dropped() {
        let entry =
            WebhookOutboxEntry::new("qr-1", "http://localhost:9000/x", json!({}), Some(String::new()), now())
                .unwrap();
        assert!(entry.secret.is_none());
    }

    #[test]
    fn rejects_bad_urls() {
        for url in ["not a url", "ftp://example.com/hook", "mailto:ops@example.com"] {
            let result = WebhookOutboxEntry::new("qr-1", url, json!({}), None, now());
            assert!(matches!(result, Err(QrGenError::InvalidInput(_))), "{url} should be rejected");
        }
    }

    #[test]
    fn secret_is_not_serialized() {
        let entry =
            WebhookOutboxEntry::new("qr-1", "https://example.com", json!({}), Some("k".into()), now())
                .unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("secret").is_none());
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        assert_eq!(webhook_retry_delay(1), Duration::minutes(1));
        assert_eq!(webhook_retry_delay(2), Duration::minutes(2));
        assert_eq!(webhook_retry_delay(4), Duration::minutes(8));
        assert_eq!(webhook_retry_delay(10), Duration::hours(1));
        assert_eq!(webhook_retry_delay(u32::MAX), Duration::hours(1));
    }

    #[test]
    fn failed_entry_is_terminal_only_when_attempts_spent() {
        let mut entry =
            WebhookOutboxEntry::new("qr-1", "https://example.com", json!({}), None, now()).unwrap();
        entry.status = WebhookStatus::Failed;
        entry.attempts = 3;
        assert!(!entry.is_terminal());
        entry.attempts = 5;
        assert!(entry.is_terminal());
    }

    #[test]
    fn summary_tracks_total() {
        let mut summary = WebhookStatusSummary::default();
        summary.add(WebhookStatus::Pending, 2);
        summary.add(WebhookStatus::Delivered, 3);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.delivered, 3);
    }
}
