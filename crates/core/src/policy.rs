//! Translation between configuration, the generic resilience primitives and
//! `QrGenError`

use std::time::Duration;

use qrgen_common::resilience::{
    CircuitBreakerConfig, ConfigError, ResilienceError, RetryConfig, RetryError,
};
use qrgen_domain::{QrGenError, ResilienceConfig, Result};

/// Retry policy for database calls
///
/// # Errors
/// Returns `QrGenError::Config` if the values do not form a valid policy.
pub fn database_retry_config(config: &ResilienceConfig) -> Result<RetryConfig> {
    RetryConfig::builder()
        .max_retries(config.max_retries)
        .initial_delay(Duration::from_millis(config.initial_delay_ms))
        .max_delay(Duration::from_millis(config.max_delay_ms))
        .timeout(Duration::from_millis(config.timeout_ms))
        .build()
        .map_err(config_error)
}

/// Breaker settings for the `database` service
///
/// # Errors
/// Returns `QrGenError::Config` if `failure_threshold` is zero.
pub fn database_breaker_config(config: &ResilienceConfig) -> Result<CircuitBreakerConfig> {
    CircuitBreakerConfig::builder()
        .failure_threshold(config.failure_threshold)
        .reset_timeout(Duration::from_millis(config.reset_timeout_ms))
        .monitoring_period(Duration::from_millis(config.monitoring_period_ms))
        .build()
        .map_err(config_error)
}

pub fn config_error(err: ConfigError) -> QrGenError {
    QrGenError::Config(err.to_string())
}

/// Collapse a retry outcome into the domain error.
///
/// Timeouts become `Timeout`; an exhausted sequence yields the last attempt's
/// error unchanged.
pub fn from_retry_error(err: RetryError<QrGenError>, operation: &str) -> QrGenError {
    match err {
        RetryError::Timeout { timeout, attempt } => QrGenError::Timeout(format!(
            "{operation} exceeded {}ms on attempt {}",
            timeout.as_millis(),
            attempt + 1
        )),
        RetryError::Exhausted { source, .. } => source,
    }
}

/// Like [`from_retry_error`], with breaker rejection mapped to `CircuitOpen`
pub fn from_guarded_error(
    err: ResilienceError<RetryError<QrGenError>>,
    operation: &str,
) -> QrGenError {
    match err {
        ResilienceError::CircuitOpen { service } => QrGenError::CircuitOpen(service),
        ResilienceError::OperationFailed { source } => from_retry_error(source, operation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resilience_config_maps_to_documented_policy() {
        let config = ResilienceConfig::default();

        let retry = database_retry_config(&config).unwrap();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.timeout, Duration::from_secs(30));

        let breaker = database_breaker_config(&config).unwrap();
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.reset_timeout, Duration::from_secs(60));
    }

    #[test]
    fn zero_threshold_is_a_config_error() {
        let config = ResilienceConfig { failure_threshold: 0, ..ResilienceConfig::default() };
        assert!(matches!(database_breaker_config(&config), Err(QrGenError::Config(_))));
    }

    #[test]
    fn error_mapping() {
        let open = from_guarded_error(
            ResilienceError::CircuitOpen { service: "database".into() },
            "select",
        );
        assert_eq!(open, QrGenError::CircuitOpen("database".into()));

        let timeout = from_retry_error(
            RetryError::Timeout { timeout: Duration::from_millis(50), attempt: 0 },
            "select",
        );
        assert!(matches!(timeout, QrGenError::Timeout(msg) if msg.contains("50ms")));

        let exhausted = from_retry_error(
            RetryError::Exhausted { attempts: 4, source: QrGenError::NotFound("row".into()) },
            "select",
        );
        assert_eq!(exhausted, QrGenError::NotFound("row".into()));
    }
}
