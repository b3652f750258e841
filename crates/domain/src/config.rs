//! Configuration management

use serde::{Deserialize, Serialize};

use crate::constants::{
    DATABASE_FAILURE_THRESHOLD, DATABASE_MAX_RETRIES, DATABASE_RESET_TIMEOUT_MS,
    DATABASE_TIMEOUT_MS, JOB_DRAIN_LIMIT, JOB_PROCESSING_TIMEOUT_MS, JOB_RETRY_BACKOFF_MS,
    JOB_STALE_AFTER_MS, WEBHOOK_BATCH_SIZE, WEBHOOK_MAX_RETRIES_PER_DELIVERY,
    WEBHOOK_REQUEST_TIMEOUT_MS, WEBHOOK_STALE_AFTER_MS,
};
use crate::impl_domain_status_conversions;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub resilience: ResilienceConfig,
    pub jobs: JobsConfig,
    pub webhooks: WebhooksConfig,
    pub logging: LoggingConfig,
}

/// Which store backs the queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Sqlite,
    Postgres,
}

impl_domain_status_conversions!(DatabaseBackend {
    Sqlite => "sqlite",
    Postgres => "postgres",
});

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    /// SQLite file path
    pub path: String,
    /// Postgres connection string
    #[serde(skip_serializing)]
    pub url: Option<String>,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Sqlite,
            path: "qrgen.db".to_string(),
            url: None,
            pool_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Retry and circuit-breaker settings for database access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub monitoring_period_ms: u64,
    pub circuit_breaker_enabled: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DATABASE_TIMEOUT_MS,
            max_retries: DATABASE_MAX_RETRIES,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            failure_threshold: DATABASE_FAILURE_THRESHOLD,
            reset_timeout_ms: DATABASE_RESET_TIMEOUT_MS,
            monitoring_period_ms: 60_000,
            circuit_breaker_enabled: true,
        }
    }
}

/// Background job worker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
    /// Most jobs run per worker tick
    pub drain_limit: usize,
    /// Per-attempt timeout
    pub processing_timeout_ms: u64,
    pub retry_backoff_ms: u64,
    /// Age after which a `processing` claim counts as abandoned
    pub stale_after_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 5,
            drain_limit: JOB_DRAIN_LIMIT,
            processing_timeout_ms: JOB_PROCESSING_TIMEOUT_MS,
            retry_backoff_ms: JOB_RETRY_BACKOFF_MS,
            stale_after_ms: JOB_STALE_AFTER_MS,
        }
    }
}

/// Webhook outbox worker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhooksConfig {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
    pub batch_size: usize,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    /// Age after which a `processing` claim counts as abandoned
    pub stale_after_ms: u64,
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 10,
            batch_size: WEBHOOK_BATCH_SIZE,
            request_timeout_ms: WEBHOOK_REQUEST_TIMEOUT_MS,
            max_retries: WEBHOOK_MAX_RETRIES_PER_DELIVERY,
            stale_after_ms: WEBHOOK_STALE_AFTER_MS,
        }
    }
}

/// Tracing subscriber configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"database": {"backend": "postgres", "url": "postgres://x"}}"#)
                .unwrap();

        assert_eq!(config.database.backend, DatabaseBackend::Postgres);
        assert_eq!(config.database.url.as_deref(), Some("postgres://x"));
        assert_eq!(config.database.pool_size, 8);
        assert_eq!(config.resilience.timeout_ms, 30_000);
        assert_eq!(config.webhooks.batch_size, 10);
    }

    #[test]
    fn database_url_is_not_serialized() {
        let mut config = Config::default();
        config.database.url = Some("postgres://user:pw@host/db".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("user:pw"));
    }

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("POSTGRES".parse::<DatabaseBackend>().unwrap(), DatabaseBackend::Postgres);
        assert!("mysql".parse::<DatabaseBackend>().is_err());
    }
}
