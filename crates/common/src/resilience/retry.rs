//! Timeout-bounded retry with exponential backoff
//!
//! Every attempt races the operation against a per-attempt timeout. Ordinary
//! failures are retried after an exponentially growing delay. A timeout ends
//! the sequence immediately and is never retried.
//!
//! # Known limitation
//!
//! A timed-out attempt is abandoned by dropping its future. Any side effect
//! the operation already triggered on a remote system (a committed insert, a
//! delivered HTTP request) is not rolled back and may still complete.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::circuit_breaker::{ConfigError, ConfigResult};
use crate::utils::serde::duration_millis;

/// Errors returned by [`RetryExecutor`]
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// An attempt exceeded the per-attempt timeout. Never retried.
    #[error("Operation timed out after {}ms", timeout.as_millis())]
    Timeout {
        /// Configured per-attempt timeout
        timeout: Duration,
        /// Zero-based attempt that timed out
        attempt: u32,
    },

    /// Every attempt failed; carries the error of the last one
    #[error("All retry attempts exhausted after {attempts} tries: {source}")]
    Exhausted {
        /// Total number of attempts made (`max_retries + 1`)
        attempts: u32,
        /// Error returned by the final attempt
        source: E,
    },
}

impl<E> RetryError<E> {
    /// True when the sequence ended because an attempt timed out.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Return the last operation error, if the sequence ended with one.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Exhausted { source, .. } => Some(source),
            Self::Timeout { .. } => None,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Retry and timeout policy.
///
/// Deserializing accepts partial documents: any missing field keeps its
/// default, so a config file only needs to state the overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = `max_retries + 1`)
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Growth factor applied per retry
    pub backoff_multiplier: f64,
    /// Per-attempt timeout
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            timeout: Duration::from_millis(30_000),
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder seeded with the defaults
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                message: "backoff_multiplier must be a finite number >= 1.0".to_string(),
            });
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                message: "timeout must be greater than 0".to_string(),
            });
        }

        if self.initial_delay > self.max_delay {
            return Err(ConfigError::Invalid {
                message: "initial_delay must not exceed max_delay".to_string(),
            });
        }

        Ok(())
    }

    /// Delay slept after the failed attempt with zero-based index `attempt`.
    ///
    /// `min(initial_delay * backoff_multiplier^attempt, max_delay)`
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Builder for [`RetryConfig`]; unset fields keep their defaults
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Details handed to the error hook after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    /// Zero-based attempt index
    pub attempt: u32,
    /// Whether the attempt hit the per-attempt timeout
    pub timed_out: bool,
    /// Rendered error message
    pub message: String,
}

/// Executes fallible async operations under a [`RetryConfig`]
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, times out, or runs out of retries.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute_with_handler(operation, |_| async { Ok::<(), Infallible>(()) }).await
    }

    /// Like [`execute`](Self::execute), but awaits `on_error` after every
    /// failed attempt, timeouts included, before deciding what to do next.
    ///
    /// An error returned by the hook is logged and otherwise ignored; it never
    /// replaces the operation's own error.
    #[instrument(
        skip(self, operation, on_error),
        fields(max_retries = self.config.max_retries, timeout_ms = self.timeout_millis())
    )]
    pub async fn execute_with_handler<F, Fut, T, E, H, HFut, HE>(
        &self,
        mut operation: F,
        mut on_error: H,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        H: FnMut(AttemptFailure) -> HFut,
        HFut: Future<Output = Result<(), HE>>,
        HE: fmt::Display,
    {
        let max_retries = self.config.max_retries;
        let timeout = self.config.timeout;
        let mut attempt: u32 = 0;

        loop {
            match tokio::time::timeout(timeout, operation()).await {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!(attempt, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(_elapsed) => {
                    let failure = AttemptFailure {
                        attempt,
                        timed_out: true,
                        message: format!("Operation timed out after {}ms", timeout.as_millis()),
                    };
                    notify(&mut on_error, failure).await;
                    warn!(attempt, "Operation timed out; not retrying");
                    return Err(RetryError::Timeout { timeout, attempt });
                }
                Ok(Err(error)) => {
                    let failure =
                        AttemptFailure { attempt, timed_out: false, message: error.to_string() };
                    notify(&mut on_error, failure).await;

                    if attempt >= max_retries {
                        warn!(attempts = attempt + 1, error = %error, "All retry attempts exhausted");
                        return Err(RetryError::Exhausted { attempts: attempt + 1, source: error });
                    }

                    let delay = self.config.backoff_delay(attempt);
                    debug!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Operation failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn timeout_millis(&self) -> u64 {
        u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

async fn notify<H, HFut, HE>(on_error: &mut H, failure: AttemptFailure)
where
    H: FnMut(AttemptFailure) -> HFut,
    HFut: Future<Output = Result<(), HE>>,
    HE: fmt::Display,
{
    let attempt = failure.attempt;
    if let Err(hook_error) = on_error(failure).await {
        warn!(attempt, error = %hook_error, "Retry error hook failed; ignoring");
    }
}

/// Convenience wrapper: build an executor for `config` and run `operation`.
pub async fn retry_with_timeout<F, Fut, T, E>(config: RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    RetryExecutor::new(config).execute(operation).await
}

/// Convenience wrapper around [`RetryExecutor::execute_with_handler`].
pub async fn retry_with_timeout_and_handler<F, Fut, T, E, H, HFut, HE>(
    config: RetryConfig,
    operation: F,
    on_error: H,
) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    H: FnMut(AttemptFailure) -> HFut,
    HFut: Future<Output = Result<(), HE>>,
    HE: fmt::Display,
{
    RetryExecutor::new(config).execute_with_handler(operation, on_error).await
}
