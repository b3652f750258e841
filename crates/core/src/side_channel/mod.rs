//! Best-effort side effects
//!
//! Audit logging and similar secondary writes must never fail the operation
//! that triggered them. Their outcome is reported as a [`SideEffect`] rather
//! than folded into the caller's `Result`, so the signature says what the
//! behaviour is.

pub mod ports;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use qrgen_domain::constants::MAX_ERROR_MESSAGE_LENGTH;
use qrgen_domain::{truncate_text, AuditEvent};
use tracing::{debug, warn};

use self::ports::AuditSink;

/// Outcome of a best-effort effect
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a dropped side effect is already logged; bind to `_` to ignore it explicitly"]
pub enum SideEffect {
    Recorded,
    Dropped { reason: String },
}

impl SideEffect {
    pub const fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded)
    }
}

/// Await `effect`, logging a failure at `warn` instead of propagating it.
pub async fn best_effort<Fut, E>(channel: &'static str, effect: Fut) -> SideEffect
where
    Fut: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    match effect.await {
        Ok(()) => SideEffect::Recorded,
        Err(err) => {
            let reason = truncate_text(&err.to_string(), MAX_ERROR_MESSAGE_LENGTH);
            warn!(channel, error = %reason, "Best-effort side effect dropped");
            SideEffect::Dropped { reason }
        }
    }
}

/// Writes audit events through an optional [`AuditSink`].
///
/// A logger without a sink records nothing and reports every event as
/// dropped.
#[derive(Clone, Default)]
pub struct AuditLogger {
    sink: Option<Arc<dyn AuditSink>>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub const fn disabled() -> Self {
        Self { sink: None }
    }

    pub async fn record(&self, event: AuditEvent) -> SideEffect {
        let Some(sink) = &self.sink else {
            debug!(action = %event.action, "Audit sink not configured");
            return SideEffect::Dropped { reason: "audit sink not configured".to_string() };
        };

        best_effort("audit", sink.record(&event)).await
    }
}

impl fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLogger").field("enabled", &self.sink.is_some()).finish()
    }
}
