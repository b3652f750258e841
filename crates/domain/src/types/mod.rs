//! Domain records and status enums

pub mod audit;
pub mod jobs;
pub mod webhooks;

pub use audit::AuditEvent;
pub use jobs::{BackgroundJob, JobFailureOutcome, JobOptions, JobStatus, JobType};
pub use webhooks::{webhook_retry_delay, WebhookOutboxEntry, WebhookStatus, WebhookStatusSummary};

/// Truncate `text` to at most `max_chars` characters, appending `...` when
/// something was cut. Used before persisting error messages and response
/// bodies.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}
