//! # qrgen Domain
//!
//! Records, status enums, errors and configuration shared by the reliability
//! layer.
//!
//! This crate contains:
//! - Persisted records (`BackgroundJob`, `WebhookOutboxEntry`, `AuditEvent`)
//! - Domain error type and `Result` alias
//! - Configuration structures
//! - Domain constants
//!
//! ## Architecture
//! - No dependencies on other qrgen crates
//! - Only external dependencies allowed
//! - Pure data and pure functions, no I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
