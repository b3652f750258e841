//! Resilient data access
//!
//! [`ResilientDataClient`] runs every store call through a [`RetryExecutor`]
//! and, unless disabled, the shared `database` circuit breaker.

pub mod ports;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use qrgen_common::resilience::{
    CircuitBreaker, CircuitBreakerRegistry, Clock, RetryConfig, RetryExecutor, SystemClock,
};
use qrgen_domain::constants::{DATABASE_MAX_RETRIES, DATABASE_SERVICE_NAME, DATABASE_TIMEOUT_MS};
use qrgen_domain::{QrGenError, ResilienceConfig, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use self::ports::{DataStore, Filter, Row};
use crate::policy::{
    config_error, database_breaker_config, database_retry_config, from_guarded_error,
    from_retry_error,
};

/// Per-client overrides of the database policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataClientOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub use_circuit_breaker: bool,
}

impl Default for DataClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DATABASE_TIMEOUT_MS),
            max_retries: DATABASE_MAX_RETRIES,
            use_circuit_breaker: true,
        }
    }
}

impl DataClientOptions {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            use_circuit_breaker: config.circuit_breaker_enabled,
        }
    }
}

/// Table operations wrapped in retry, timeout and the `database` breaker.
///
/// Cloning is cheap; clones share the store and the breaker.
pub struct ResilientDataClient<C: Clock + Clone = SystemClock> {
    store: Arc<dyn DataStore>,
    breaker: Arc<CircuitBreaker<C>>,
    retry: RetryExecutor,
    use_circuit_breaker: bool,
}

impl<C: Clock + Clone> Clone for ResilientDataClient<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            breaker: Arc::clone(&self.breaker),
            retry: self.retry.clone(),
            use_circuit_breaker: self.use_circuit_breaker,
        }
    }
}

impl<C: Clock + Clone> fmt::Debug for ResilientDataClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientDataClient")
            .field("retry", self.retry.config())
            .field("breaker", &self.breaker.name())
            .field("use_circuit_breaker", &self.use_circuit_breaker)
            .finish_non_exhaustive()
    }
}

impl<C: Clock + Clone> ResilientDataClient<C> {
    /// Build a client whose breaker is the registry's `database` entry.
    ///
    /// # Errors
    /// Returns `QrGenError::Config` if `config` is not a valid policy.
    pub fn new(
        store: Arc<dyn DataStore>,
        registry: &CircuitBreakerRegistry<C>,
        config: &ResilienceConfig,
    ) -> Result<Self> {
        let retry = database_retry_config(config)?;
        let breaker = registry
            .get_or_create(DATABASE_SERVICE_NAME, database_breaker_config(config)?)
            .map_err(config_error)?;

        Ok(Self {
            store,
            breaker,
            retry: RetryExecutor::new(retry),
            use_circuit_breaker: config.circuit_breaker_enabled,
        })
    }

    /// Copy of this client with `options` applied; the breaker is shared.
    ///
    /// # Errors
    /// Returns `QrGenError::Config` for a zero timeout.
    pub fn with_options(&self, options: DataClientOptions) -> Result<Self> {
        let retry = RetryConfig {
            max_retries: options.max_retries,
            timeout: options.timeout,
            ..self.retry.config().clone()
        };
        retry.validate().map_err(config_error)?;

        Ok(Self {
            store: Arc::clone(&self.store),
            breaker: Arc::clone(&self.breaker),
            retry: RetryExecutor::new(retry),
            use_circuit_breaker: options.use_circuit_breaker,
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker<C>> {
        &self.breaker
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    /// Run a non-nullable query. `Ok(None)` from `query_fn` fails the attempt
    /// with `NotFound` and is retried like any other failure.
    ///
    /// # Errors
    /// `CircuitOpen` if the breaker rejected the call, `Timeout` if an
    /// attempt timed out, otherwise the last attempt's error.
    pub async fn query<T, F, Fut>(&self, query_fn: F) -> Result<T>
    where
        F: Fn(Arc<dyn DataStore>) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        self.run("query", || {
            let attempt = query_fn(Arc::clone(&self.store));
            async move {
                attempt.await?.ok_or_else(|| QrGenError::NotFound("query returned no data".into()))
            }
        })
        .await
    }

    /// Run a nullable query; `None` is a successful outcome.
    ///
    /// # Errors
    /// As for [`query`](Self::query).
    pub async fn query_optional<T, F, Fut>(&self, query_fn: F) -> Result<Option<T>>
    where
        F: Fn(Arc<dyn DataStore>) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        self.run("query_optional", || query_fn(Arc::clone(&self.store))).await
    }

    /// Rows of `table` matching `filter`
    ///
    /// # Errors
    /// As for [`query`](Self::query), plus deserialization failures.
    #[instrument(skip(self, filter))]
    pub async fn select<T: DeserializeOwned>(&self, table: &str, filter: &Filter) -> Result<Vec<T>> {
        let rows = self.run("select", || self.store.select(table, filter)).await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Insert `data` (which must serialize to an object) and return the
    /// stored row
    ///
    /// # Errors
    /// `InvalidInput` if `data` is not an object; otherwise as for
    /// [`query`](Self::query).
    #[instrument(skip(self, data))]
    pub async fn insert<T, R>(&self, table: &str, data: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let row = to_row(data)?;
        let stored = self.run("insert", || self.store.insert(table, row.clone())).await?;
        from_row(stored)
    }

    /// Apply `data` to the rows matching `filter`. Matching nothing is a
    /// failure.
    ///
    /// # Errors
    /// `InvalidInput` for an empty filter or non-object data, `NotFound`
    /// when no row matched; otherwise as for [`query`](Self::query).
    #[instrument(skip(self, data, filter))]
    pub async fn update<T, R>(&self, table: &str, data: &T, filter: &Filter) -> Result<Vec<R>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        require_filter("update", filter)?;
        let changes = to_row(data)?;

        let rows = self
            .run("update", || {
                let changes = changes.clone();
                async move {
                    let rows = self.store.update(table, changes, filter).await?;
                    if rows.is_empty() {
                        return Err(QrGenError::NotFound(format!("no {table} row matched update")));
                    }
                    Ok(rows)
                }
            })
            .await?;

        rows.into_iter().map(from_row).collect()
    }

    /// Delete the rows matching `filter`, returning how many were removed
    ///
    /// # Errors
    /// `InvalidInput` for an empty filter; otherwise as for
    /// [`query`](Self::query).
    #[instrument(skip(self, filter))]
    pub async fn delete(&self, table: &str, filter: &Filter) -> Result<u64> {
        require_filter("delete", filter)?;
        self.run("delete", || self.store.delete(table, filter)).await
    }

    async fn run<T, F, Fut>(&self, operation: &str, attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.use_circuit_breaker {
            self.breaker
                .execute(|| self.retry.execute(attempt))
                .await
                .map_err(|err| from_guarded_error(err, operation))
        } else {
            debug!(operation, "Circuit breaker bypassed");
            self.retry.execute(attempt).await.map_err(|err| from_retry_error(err, operation))
        }
    }
}

fn require_filter(operation: &str, filter: &Filter) -> Result<()> {
    if filter.is_empty() {
        return Err(QrGenError::InvalidInput(format!("{operation} requires at least one filter")));
    }
    Ok(())
}

fn to_row<T: Serialize + ?Sized>(data: &T) -> Result<Row> {
    match serde_json::to_value(data) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(QrGenError::InvalidInput(format!("expected a JSON object, got {other}"))),
        Err(err) => Err(QrGenError::InvalidInput(err.to_string())),
    }
}

fn from_row<R: DeserializeOwned>(row: Row) -> Result<R> {
    serde_json::from_value(Value::Object(row))
        .map_err(|err| QrGenError::Database(format!("unexpected row shape: {err}")))
}
