//! Registry of named circuit breakers
//!
//! One breaker per downstream service name, created lazily on first use and
//! kept for the registry's lifetime. The registry is an ordinary value that
//! callers construct and share (typically behind an `Arc`); there is no
//! process-wide instance.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, Clock, ConfigResult, SystemClock,
};

/// Named breakers sharing one clock
pub struct CircuitBreakerRegistry<C: Clock + Clone = SystemClock> {
    breakers: DashMap<String, Arc<CircuitBreaker<C>>>,
    clock: C,
}

impl CircuitBreakerRegistry<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for CircuitBreakerRegistry<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> CircuitBreakerRegistry<C> {
    /// Registry whose breakers read time from `clock`
    pub fn with_clock(clock: C) -> Self {
        Self { breakers: DashMap::new(), clock }
    }

    /// Return the breaker registered under `name`, creating it with `config`
    /// if it does not exist yet.
    ///
    /// The first caller's configuration wins; later calls with a different
    /// configuration get the existing breaker unchanged.
    pub fn get_or_create(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<Arc<CircuitBreaker<C>>> {
        if let Some(existing) = self.breakers.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        config.validate()?;
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            debug!(service = name, "Creating circuit breaker");
            Arc::new(CircuitBreaker::from_validated(name.to_string(), config, self.clock.clone()))
        });
        Ok(Arc::clone(entry.value()))
    }

    /// Look up an existing breaker
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Names of all registered breakers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshot of every registered breaker, sorted by name
    pub fn snapshot(&self) -> Vec<CircuitBreakerMetrics> {
        let mut all: Vec<CircuitBreakerMetrics> =
            self.breakers.iter().map(|e| e.value().metrics()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Reset every breaker to closed
    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
