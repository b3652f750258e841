//! PostgreSQL adapters.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers on separate
//! hosts never block on, or double-claim, the same row.

pub mod audit_repository;
pub mod client;
pub mod job_repository;
pub mod webhook_repository;

pub use audit_repository::PgAuditRepository;
pub use client::PgDatabase;
pub use job_repository::PgJobRepository;
pub use webhook_repository::PgWebhookOutboxRepository;
