//! Per-service circuit breaker
//!
//! Tracks consecutive failures of one downstream dependency and short-circuits
//! calls while the dependency looks unhealthy.
//!
//! ```text
//!            failures >= threshold
//!   CLOSED ─────────────────────────▶ OPEN
//!     ▲                                │ now >= next_retry_time
//!     │ probe succeeds                 ▼
//!     └────────────────────────── HALF_OPEN ──▶ OPEN (probe fails)
//! ```
//!
//! Half-open does not limit concurrency: every call that arrives while the
//! breaker is half-open is let through as a probe, and the first result to
//! land decides the next state.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

//==============================================================================
// Time Abstraction for Testability
//==============================================================================

/// Source of monotonic time for the breaker.
///
/// Production code uses [`SystemClock`]; tests use [`MockClock`] to move time
/// forward without sleeping.
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Manually advanced clock. Clones share the same elapsed time.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Move the clock forward by `duration`
    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *elapsed += duration;
    }

    /// Advance the mock clock by milliseconds
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }
}

//==============================================================================
// Error Types
//==============================================================================

/// Configuration validation error shared by the resilience builders
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced by [`CircuitBreaker::execute`]
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The breaker is open and rejected the call without running it
    #[error("Circuit breaker is OPEN for {service}, rejecting calls")]
    CircuitOpen { service: String },

    /// The protected operation ran and failed
    #[error("Operation failed: {source}")]
    OperationFailed { source: E },
}

impl<E> ResilienceError<E> {
    /// True when the call was rejected without running the operation
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// Result type for breaker-protected operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until `next_retry_time`
    Open,
    /// Calls are let through as probes
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures (while closed) that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a probe
    pub reset_timeout: Duration,
    /// Failures older than this are forgotten on the next success
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_millis(60_000),
            monitoring_period: Duration::from_millis(60_000),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder seeded with the defaults
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    pub fn monitoring_period(mut self, period: Duration) -> Self {
        self.config.monitoring_period = period;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time snapshot of a breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
    pub next_retry_time: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    next_retry_time: Option<Instant>,
}

impl BreakerState {
    const fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            next_retry_time: None,
        }
    }
}

/// Circuit breaker guarding a single named service.
///
/// State lives behind a `std::sync::Mutex` that is only held for the few
/// instructions of a transition, never across an `.await`.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &snapshot.state)
            .field("failure_count", &snapshot.failure_count)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker for `name` using the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(name.into(), config, clock))
    }

    pub(crate) fn from_validated(name: String, config: CircuitBreakerConfig, clock: C) -> Self {
        Self { name, config, inner: Mutex::new(BreakerState::closed()), clock }
    }

    /// Name of the protected service
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under breaker protection.
    ///
    /// Returns [`ResilienceError::CircuitOpen`] without invoking the operation
    /// while the circuit is open and its reset timeout has not elapsed.
    #[instrument(skip(self, operation), fields(service = %self.name, state = %self.state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            debug!(service = %self.name, "Circuit breaker rejecting call");
            return Err(ResilienceError::CircuitOpen { service: self.name.clone() });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Run `operation`, substituting `fallback` when the call is rejected or
    /// fails. The failure is still recorded against the breaker.
    pub async fn execute_with_fallback<F, Fut, FB, FbFut, T, E>(
        &self,
        operation: F,
        fallback: FB,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        match self.execute(operation).await {
            Ok(value) => Ok(value),
            Err(ResilienceError::CircuitOpen { .. }) => fallback().await,
            Err(ResilienceError::OperationFailed { source }) => {
                warn!(service = %self.name, error = %source, "Operation failed, using fallback");
                fallback().await
            }
        }
    }

    /// Current state without triggering the open → half-open transition
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Failures counted since the last reset
    pub fn failures(&self) -> u32 {
        self.lock().failure_count
    }

    /// True while the breaker rejects calls
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Snapshot of the breaker's counters
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let state = *self.lock();
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            last_failure_time: state.last_failure_time,
            next_retry_time: state.next_retry_time,
        }
    }

    /// Force the breaker back to closed with zero failures
    pub fn reset(&self) {
        *self.lock() = BreakerState::closed();
        info!(service = %self.name, "Circuit breaker manually reset to closed state");
    }

    /// Decide whether a call may run, moving open → half-open once the reset
    /// timeout has elapsed.
    fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let ready = inner.next_retry_time.map_or(true, |at| now >= at);
                if ready {
                    inner.state = CircuitState::HalfOpen;
                    inner.failure_count = 0;
                    info!(service = %self.name, "Circuit breaker half-open, probing service");
                }
                ready
            }
        }
    }

    fn record_success(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.next_retry_time = None;
                info!(service = %self.name, "Circuit breaker closed after successful probe");
            }
            CircuitState::Closed => {
                let stale = inner.last_failure_time.is_some_and(|last| {
                    now.saturating_duration_since(last) > self.config.monitoring_period
                });
                if stale && inner.failure_count > 0 {
                    debug!(service = %self.name, "Forgetting failures outside monitoring period");
                    inner.failure_count = 0;
                }
            }
            // A call admitted before the circuit opened finished late.
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();

        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(now);

        let probe_failed = inner.state == CircuitState::HalfOpen;
        if probe_failed || inner.failure_count >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            inner.next_retry_time = Some(now + self.config.reset_timeout);
            warn!(
                service = %self.name,
                failures = inner.failure_count,
                probe_failed,
                reset_timeout_ms = u64::try_from(self.config.reset_timeout.as_millis()).unwrap_or(u64::MAX),
                "Circuit breaker opened"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
