//! # qrgen infrastructure
//!
//! Adapters for the ports defined in `qrgen-core`:
//! - SQLite stores (rusqlite + r2d2) and, behind the `postgres` feature,
//!   Postgres stores (tokio-postgres)
//! - reqwest webhook transport
//! - configuration loading and tracing setup
//! - periodic job and outbox workers
//!
//! Everything that performs I/O lives here.

pub mod config;
pub mod database;
pub mod errors;
pub mod http;
pub mod observability;
pub mod workers;

pub use database::{
    DbManager, SqliteAuditRepository, SqliteDataStore, SqliteJobRepository,
    SqliteWebhookOutboxRepository,
};
#[cfg(feature = "postgres")]
pub use database::{PgAuditRepository, PgDatabase, PgJobRepository, PgWebhookOutboxRepository};
pub use errors::InfraError;
pub use http::HttpWebhookTransport;
pub use observability::init_tracing;
pub use workers::{
    JobWorker, OutboxWorker, PeriodicWorker, TickBudget, WorkerConfig, WorkerError,
};
