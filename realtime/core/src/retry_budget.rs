//! Per-Connection Retry Budgets
//!
//! Each connection id gets a bucket of creation attempts per window. A failed
//! creation spends one attempt; when the bucket is empty further requests for
//! that id are rejected without contacting the backend until the window ends.
//!
//! Windows reset lazily: the next access at or after `reset_at` refills the
//! bucket. There is no background refill timer.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Configuration for retry budgets
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryBudgetConfig {
    /// Attempts allowed per window
    pub max_attempts: u32,
    /// Window length
    pub window: Duration,
}

impl Default for RetryBudgetConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(60),
        }
    }
}

impl RetryBudgetConfig {
    /// Set attempts per window
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the window length
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Budget state for one connection id
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryBudget {
    /// Attempts left in the current window
    pub remaining: u32,
    /// When the window ends and the bucket refills
    pub reset_at: Instant,
}

impl RetryBudget {
    fn fresh(config: &RetryBudgetConfig, now: Instant) -> Self {
        Self {
            remaining: config.max_attempts,
            reset_at: now + config.window,
        }
    }

    fn refresh(&mut self, config: &RetryBudgetConfig, now: Instant) {
        if now >= self.reset_at {
            *self = Self::fresh(config, now);
        }
    }

    /// Whether any attempts are left
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.remaining > 0
    }
}

/// Retry budgets keyed by connection id
#[derive(Debug)]
pub struct RetryBudgets {
    config: RetryBudgetConfig,
    budgets: DashMap<String, RetryBudget>,
}

impl RetryBudgets {
    /// Create an empty budget table
    #[must_use]
    pub fn new(config: RetryBudgetConfig) -> Self {
        Self {
            config,
            budgets: DashMap::new(),
        }
    }

    /// Check whether `id` may attempt a creation
    ///
    /// Returns the remaining attempts, or the time until the window resets
    /// when the budget is exhausted.
    pub fn check(&self, id: &str) -> Result<u32, Duration> {
        let now = Instant::now();
        let mut budget = self
            .budgets
            .entry(id.to_string())
            .or_insert_with(|| RetryBudget::fresh(&self.config, now));
        budget.refresh(&self.config, now);

        if budget.has_remaining() {
            Ok(budget.remaining)
        } else {
            Err(budget.reset_at.saturating_duration_since(now))
        }
    }

    /// Spend one attempt for `id`, returning what is left
    pub fn consume(&self, id: &str) -> u32 {
        let now = Instant::now();
        let mut budget = self
            .budgets
            .entry(id.to_string())
            .or_insert_with(|| RetryBudget::fresh(&self.config, now));
        budget.refresh(&self.config, now);
        budget.remaining = budget.remaining.saturating_sub(1);

        tracing::debug!(
            connection_id = %id,
            remaining = budget.remaining,
            "Retry budget consumed"
        );
        budget.remaining
    }

    /// Current budget for `id`, if one has been recorded
    #[must_use]
    pub fn get(&self, id: &str) -> Option<RetryBudget> {
        self.budgets.get(id).map(|b| *b)
    }

    /// Drop budgets whose window has ended; they would refill on next access anyway
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.budgets.len();
        self.budgets.retain(|_, budget| now < budget.reset_at);
        before - self.budgets.len()
    }

    /// Number of tracked ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.budgets.len()
    }

    /// Whether no ids are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.budgets.is_empty()
    }

    /// Forget all budgets
    pub fn clear(&self) {
        self.budgets.clear();
    }
}

impl Default for RetryBudgets {
    fn default() -> Self {
        Self::new(RetryBudgetConfig::default())
    }
}
