//! # qrgen Core
//!
//! Services of the reliability layer, written against ports only.
//!
//! This crate contains:
//! - Port interfaces (traits) for stores, the webhook transport and the audit
//!   sink
//! - `ResilientDataClient`: table operations under retry and the `database`
//!   circuit breaker
//! - `BackgroundJobQueue` and the job processor registry
//! - `WebhookOutbox` with HMAC payload signing
//! - The best-effort side channel used for audit logging
//!
//! ## Architecture Principles
//! - Depends on `qrgen-common` and `qrgen-domain` only
//! - No database, HTTP or platform code
//! - All external dependencies via traits

pub mod data;
pub mod jobs;
pub mod policy;
pub mod side_channel;
pub mod webhooks;

pub use data::ports::{DataStore, Filter, Row};
pub use data::{DataClientOptions, ResilientDataClient};
pub use jobs::ports::JobStore;
pub use jobs::{
    BackgroundJobQueue, DrainReport, JobProcessor, JobRun, ProcessorRegistry, WebhookRetryProcessor,
};
pub use side_channel::ports::AuditSink;
pub use side_channel::{best_effort, AuditLogger, SideEffect};
pub use webhooks::ports::{WebhookOutboxStore, WebhookRequest, WebhookResponse, WebhookTransport};
pub use webhooks::signature::{sign_payload, verify_signature};
pub use webhooks::{BatchReport, WebhookOutbox};
