//! Application constants
//!
//! Defaults that mirror the production deployment. Most can be overridden
//! through [`crate::Config`].

// Database resilience
pub const DATABASE_SERVICE_NAME: &str = "database";
pub const DATABASE_TIMEOUT_MS: u64 = 30_000;
pub const DATABASE_MAX_RETRIES: u32 = 3;
pub const DATABASE_FAILURE_THRESHOLD: u32 = 5;
pub const DATABASE_RESET_TIMEOUT_MS: u64 = 60_000;

// Background jobs
pub const JOB_PROCESSING_TIMEOUT_MS: u64 = 300_000;
pub const JOB_RETRY_BACKOFF_MS: u64 = 60_000;
pub const JOB_DEFAULT_MAX_RETRIES: u32 = 3;
pub const JOB_DEFAULT_PRIORITY: i32 = 0;
pub const JOB_DRAIN_LIMIT: usize = 10;
/// Claims older than this are released; above the worst-case run of a
/// default job (4 attempts of 5 minutes plus backoff).
pub const JOB_STALE_AFTER_MS: u64 = 1_800_000;

// Webhook outbox
pub const WEBHOOK_USER_AGENT: &str = "QR-Generator-Webhook/1.0";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const WEBHOOK_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const WEBHOOK_MAX_RETRIES_PER_DELIVERY: u32 = 2;
pub const WEBHOOK_DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const WEBHOOK_BATCH_SIZE: usize = 10;
pub const WEBHOOK_RETRY_BASE_DELAY_MS: i64 = 60_000;
pub const WEBHOOK_RETRY_MAX_DELAY_MS: i64 = 3_600_000;
/// Claims older than this are released; above the worst-case batch (3
/// attempts of 30 seconds plus backoff).
pub const WEBHOOK_STALE_AFTER_MS: u64 = 600_000;

// Persisted text limits
pub const MAX_ERROR_MESSAGE_LENGTH: usize = 1_000;
pub const MAX_RESPONSE_BODY_LENGTH: usize = 10_000;
