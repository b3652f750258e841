//! Database implementations

pub mod audit_repository;
mod codec;
pub mod data_store;
pub mod job_repository;
pub mod manager;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod webhook_repository;

pub use audit_repository::SqliteAuditRepository;
pub use data_store::SqliteDataStore;
pub use job_repository::SqliteJobRepository;
pub use manager::{DbManager, SqliteConnection, SqlitePool};
#[cfg(feature = "postgres")]
pub use postgres::{PgAuditRepository, PgDatabase, PgJobRepository, PgWebhookOutboxRepository};
pub use webhook_repository::SqliteWebhookOutboxRepository;
