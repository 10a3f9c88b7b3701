//! Pool Configuration

use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::config::ConfigError;
use crate::health::EvictionPolicy;
use crate::retry_budget::RetryBudgetConfig;

/// Configuration for a [`ConnectionPool`](super::ConnectionPool)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum channels held at once (in-flight creations included)
    pub max_connections: usize,
    /// Interval between health sweeps (default: 10 seconds)
    pub health_check_interval: Duration,
    /// Interval between metrics snapshots (default: 5 seconds)
    pub metrics_interval: Duration,
    /// Upper bound on a single liveness probe
    pub probe_timeout: Duration,
    /// When the sweep evicts a connection
    pub eviction: EvictionPolicy,
    /// Pool-wide circuit breaker
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-id retry budgets
    pub retry_budget: RetryBudgetConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            health_check_interval: Duration::from_secs(10),
            metrics_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            eviction: EvictionPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry_budget: RetryBudgetConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Create a config with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the health sweep interval
    #[must_use]
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the metrics interval
    #[must_use]
    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Set the probe timeout
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the inactivity threshold after which a connection is stale
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.eviction.stale_after = stale_after;
        self
    }

    /// Set the circuit breaker config
    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Set the retry budget config
    #[must_use]
    pub fn with_retry_budget(mut self, config: RetryBudgetConfig) -> Self {
        self.retry_budget = config;
        self
    }

    /// Create a config suitable for testing (short intervals)
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_connections: 3,
            health_check_interval: Duration::from_millis(100),
            metrics_interval: Duration::from_millis(50),
            probe_timeout: Duration::from_millis(50),
            eviction: EvictionPolicy {
                stale_after: Duration::from_secs(1),
                max_consecutive_failures: 5,
            },
            circuit_breaker: CircuitBreakerConfig::default()
                .with_timeout(Duration::from_millis(500)),
            retry_budget: RetryBudgetConfig::default().with_window(Duration::from_secs(1)),
        }
    }

    /// Check for values the pool cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> {
            Err(ConfigError::ValidationError(msg.to_string()))
        };

        if self.max_connections == 0 {
            return invalid("max_connections must be at least 1");
        }
        if self.health_check_interval.is_zero() {
            return invalid("health_check_interval must be non-zero");
        }
        if self.metrics_interval.is_zero() {
            return invalid("metrics_interval must be non-zero");
        }
        if self.probe_timeout.is_zero() {
            return invalid("probe_timeout must be non-zero");
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return invalid("circuit breaker failure_threshold must be at least 1");
        }
        if self.retry_budget.window.is_zero() {
            return invalid("retry budget window must be non-zero");
        }
        Ok(())
    }
}
