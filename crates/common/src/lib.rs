//! Generic utilities shared across the qrgen crates.
//!
//! Nothing in here knows about jobs, webhooks or QR codes. The crate only
//! provides the building blocks the domain services are assembled from.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: serde helpers and error types
//! - `runtime`: async resilience primitives (retry, circuit breaker,
//!   breaker registry)
//! - `observability`: tracing instrumentation (implied by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use resilience::{
    retry_with_timeout, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitState, Clock, MockClock, ResilienceError, RetryConfig, RetryError, RetryExecutor,
    SystemClock,
};
#[cfg(feature = "foundation")]
pub use utils::serde::duration_millis;
