//! Resilience patterns for calls to unreliable dependencies
//!
//! - **Retry**: timeout-bounded retries with exponential backoff
//!   ([`RetryExecutor`])
//! - **Circuit Breaker**: per-service closed/open/half-open state machine
//!   ([`CircuitBreaker`])
//! - **Registry**: named breakers shared through dependency injection
//!   ([`CircuitBreakerRegistry`])
//!
//! Everything here is generic over the caller's error type; mapping into the
//! domain error happens in the services that compose these pieces.

pub mod circuit_breaker;
pub mod registry;
pub mod retry;

// Re-export circuit breaker types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState, Clock, ConfigError, ConfigResult, MockClock, ResilienceError,
    ResilienceResult, SystemClock,
};
pub use registry::CircuitBreakerRegistry;
// Re-export retry types
pub use retry::{
    retry_with_timeout, retry_with_timeout_and_handler, AttemptFailure, RetryConfig,
    RetryConfigBuilder, RetryError, RetryExecutor, RetryResult,
};
