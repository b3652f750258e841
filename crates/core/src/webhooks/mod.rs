//! Webhook outbox
//!
//! Deliveries are written to the outbox first and sent later by
//! [`WebhookOutbox::process_pending`]. Each entry in a batch settles on its
//! own: one failing endpoint never affects the others.

pub mod ports;
pub mod signature;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use qrgen_common::resilience::{RetryConfig, RetryExecutor};
use qrgen_domain::constants::{
    MAX_ERROR_MESSAGE_LENGTH, MAX_RESPONSE_BODY_LENGTH, WEBHOOK_SIGNATURE_HEADER,
    WEBHOOK_USER_AGENT,
};
use qrgen_domain::{
    truncate_text, webhook_retry_delay, AuditEvent, QrGenError, Result, WebhookOutboxEntry,
    WebhookStatusSummary, WebhooksConfig,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use self::ports::{WebhookOutboxStore, WebhookRequest, WebhookResponse, WebhookTransport};
use self::signature::sign_body;
use crate::policy::{config_error, from_retry_error};
use crate::side_channel::AuditLogger;

/// Result of one [`WebhookOutbox::process_pending`] pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub claimed: usize,
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

/// Webhook outbox service
pub struct WebhookOutbox {
    store: Arc<dyn WebhookOutboxStore>,
    transport: Arc<dyn WebhookTransport>,
    retry: RetryExecutor,
    batch_size: usize,
    stale_after: chrono::Duration,
    audit: AuditLogger,
}

impl WebhookOutbox {
    /// # Errors
    /// Returns `QrGenError::Config` for a zero request timeout.
    pub fn new(
        store: Arc<dyn WebhookOutboxStore>,
        transport: Arc<dyn WebhookTransport>,
        config: &WebhooksConfig,
    ) -> Result<Self> {
        let retry = RetryConfig::builder()
            .max_retries(config.max_retries)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(config_error)?;

        Ok(Self {
            store,
            transport,
            retry: RetryExecutor::new(retry),
            batch_size: config.batch_size.max(1),
            stale_after: chrono::Duration::milliseconds(
                i64::try_from(config.stale_after_ms).unwrap_or(i64::MAX),
            ),
            audit: AuditLogger::disabled(),
        })
    }

    /// Emit audit events for entries that run out of attempts
    #[must_use]
    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Record a delivery to be sent by the next pass
    ///
    /// # Errors
    /// `InvalidInput` for a malformed URL or empty QR code id, otherwise the
    /// store error.
    #[instrument(skip(self, payload, secret))]
    pub async fn enqueue(
        &self,
        qr_code_id: &str,
        webhook_url: &str,
        payload: Value,
        secret: Option<String>,
    ) -> Result<WebhookOutboxEntry> {
        let entry = WebhookOutboxEntry::new(qr_code_id, webhook_url, payload, secret, Utc::now())?;
        self.store.insert_entry(&entry).await?;
        debug!(entry_id = %entry.id, "Webhook queued");
        Ok(entry)
    }

    /// Claim up to `limit` due entries
    ///
    /// # Errors
    /// Returns the store error if the claim statement fails.
    pub async fn claim_next_batch(&self, limit: usize) -> Result<Vec<WebhookOutboxEntry>> {
        self.store.claim_next_batch(limit, Utc::now()).await
    }

    /// Return entries stuck in `processing` past the stale window to
    /// `failed`, due now. Entries with attempts left are claimed again by the
    /// next pass.
    ///
    /// # Errors
    /// Returns the store error if the update fails.
    pub async fn recover_stale_entries(&self) -> Result<u64> {
        let now = Utc::now();
        let claimed_before = now.checked_sub_signed(self.stale_after).unwrap_or(now);
        let released = self
            .store
            .release_stale_entries(claimed_before, "Delivery abandoned; claim released", now)
            .await?;
        if released > 0 {
            warn!(released, "Released stale webhook claims");
        }
        Ok(released)
    }

    /// Attempt one delivery. Never fails: the outcome is persisted on the
    /// entry and reported as `true` (delivered) or `false`.
    #[instrument(skip(self, entry), fields(entry_id = %entry.id, attempt = entry.attempts + 1))]
    pub async fn deliver(&self, entry: &WebhookOutboxEntry) -> bool {
        if let Err(err) = self.store.begin_attempt(&entry.id, Utc::now()).await {
            warn!(error = %err, "Failed to record webhook attempt start");
        }
        let attempts = entry.attempts.saturating_add(1);

        match self.send(entry).await {
            Ok(response) => {
                let body = truncate_text(&response.body, MAX_RESPONSE_BODY_LENGTH);
                let body = (!body.is_empty()).then_some(body);
                if let Err(err) = self
                    .store
                    .mark_delivered(&entry.id, response.status, body.as_deref(), Utc::now())
                    .await
                {
                    warn!(error = %err, "Webhook delivered but status update failed");
                }
                info!(status = response.status, "Webhook delivered");
                true
            }
            Err(err) => {
                let message = truncate_text(&err.to_string(), MAX_ERROR_MESSAGE_LENGTH);
                let now = Utc::now();
                let next_retry_at = now + webhook_retry_delay(attempts);

                if let Err(record_err) =
                    self.store.mark_failed(&entry.id, &message, next_retry_at, now).await
                {
                    warn!(error = %record_err, "Failed to record webhook failure");
                }

                if attempts >= entry.max_attempts {
                    warn!(attempts, error = %message, "Webhook delivery attempts exhausted");
                    let _ = self
                        .audit
                        .record(
                            AuditEvent::failure(
                                "webhook.exhausted",
                                "webhook_outbox",
                                Some(entry.id.clone()),
                                message,
                                now,
                            )
                            .with_metadata(serde_json::json!({
                                "qr_code_id": entry.qr_code_id,
                                "attempts": attempts,
                            })),
                        )
                        .await;
                } else {
                    warn!(attempts, next_retry_at = %next_retry_at, error = %message, "Webhook delivery failed");
                }
                false
            }
        }
    }

    /// Claim one batch and deliver it concurrently.
    ///
    /// # Errors
    /// Returns the claim error; delivery failures are reported in the
    /// [`BatchReport`] instead.
    pub async fn process_pending(&self) -> Result<BatchReport> {
        let batch = self.claim_next_batch(self.batch_size).await?;
        if batch.is_empty() {
            return Ok(BatchReport::default());
        }

        let outcomes = join_all(batch.iter().map(|entry| self.deliver(entry))).await;

        let mut report = BatchReport { claimed: batch.len(), ..BatchReport::default() };
        for (entry, delivered) in batch.into_iter().zip(outcomes) {
            if delivered {
                report.delivered.push(entry.id);
            } else {
                report.failed.push(entry.id);
            }
        }

        info!(
            claimed = report.claimed,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Webhook batch processed"
        );
        Ok(report)
    }

    /// # Errors
    /// Returns the store error if the count query fails.
    pub async fn status_summary(&self, qr_code_id: &str) -> Result<WebhookStatusSummary> {
        self.store.status_summary(qr_code_id).await
    }

    async fn send(&self, entry: &WebhookOutboxEntry) -> Result<WebhookResponse> {
        let request = build_request(entry)?;
        let request = &request;
        let transport = &self.transport;

        self.retry
            .execute(move || async move {
                let response = transport.post(request).await?;
                if response.is_success() {
                    Ok(response)
                } else {
                    Err(QrGenError::Network(format!(
                        "Webhook delivery failed: HTTP {}",
                        response.status
                    )))
                }
            })
            .await
            .map_err(|err| from_retry_error(err, "webhook delivery"))
    }
}

fn build_request(entry: &WebhookOutboxEntry) -> Result<WebhookRequest> {
    let body = entry.payload.to_string();

    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers.insert("User-Agent".to_string(), WEBHOOK_USER_AGENT.to_string());
    if let Some(secret) = entry.secret.as_deref() {
        headers.insert(WEBHOOK_SIGNATURE_HEADER.to_string(), sign_body(secret, body.as_bytes())?);
    }

    Ok(WebhookRequest { url: entry.webhook_url.clone(), headers, body })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::webhooks::signature::verify_signature;

    #[test]
    fn request_carries_signature_only_with_secret() {
        let now = Utc::now();
        let signed = WebhookOutboxEntry::new(
            "qr-1",
            "https://example.com/hook",
            json!({"event": "scan"}),
            Some("k".into()),
            now,
        )
        .unwrap();
        let request = build_request(&signed).unwrap();

        assert_eq!(request.headers["User-Agent"], "QR-Generator-Webhook/1.0");
        assert_eq!(request.headers["Content-Type"], "application/json");
        let sig = &request.headers["X-Webhook-Signature"];
        assert!(verify_signature("k", request.body.as_bytes(), sig));

        let unsigned =
            WebhookOutboxEntry::new("qr-1", "https://example.com/hook", json!({}), None, now)
                .unwrap();
        assert!(!build_request(&unsigned).unwrap().headers.contains_key("X-Webhook-Signature"));
    }
}
