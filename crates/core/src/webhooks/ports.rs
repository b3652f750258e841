//! Port interfaces for webhook delivery

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qrgen_domain::{Result, WebhookOutboxEntry, WebhookStatusSummary};

/// Durable storage for the webhook outbox
#[async_trait]
pub trait WebhookOutboxStore: Send + Sync {
    async fn insert_entry(&self, entry: &WebhookOutboxEntry) -> Result<()>;

    /// Atomically move up to `limit` due entries to `processing`, oldest
    /// first, and return them.
    ///
    /// Due means `pending` with `next_retry_at <= now`, or `failed` with
    /// attempts left and `next_retry_at <= now`.
    async fn claim_next_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookOutboxEntry>>;

    /// Record the start of a delivery attempt (`attempts += 1`)
    async fn begin_attempt(&self, id: &str, now: DateTime<Utc>) -> Result<()>;

    async fn mark_delivered(
        &self,
        id: &str,
        response_status: u16,
        response_body: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn status_summary(&self, qr_code_id: &str) -> Result<WebhookStatusSummary>;

    async fn get_entry(&self, id: &str) -> Result<Option<WebhookOutboxEntry>>;

    /// Mark `processing` entries last touched before `claimed_before` as
    /// `failed` and due at `now`, so the claim picks them up again while
    /// attempts remain. Returns the number of rows released.
    async fn release_stale_entries(
        &self,
        claimed_before: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>;
}

/// A fully prepared webhook POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// Serialized JSON payload, exactly the bytes that were signed
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

impl WebhookResponse {
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Outbound HTTP for webhooks.
///
/// Implementations enforce their own hard per-request timeout and return
/// non-2xx responses as `Ok`; status handling is the caller's job.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, request: &WebhookRequest) -> Result<WebhookResponse>;
}
