//! Pool error types

use std::time::Duration;

use thiserror::Error;

use crate::channel::ChannelError;

/// Reasons the pool refused or failed to hand out a channel
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The circuit breaker is open (or its single trial is taken)
    #[error("Circuit breaker open, retry in {}ms", retry_in.as_millis())]
    CircuitOpen {
        /// Time until a trial creation may run
        retry_in: Duration,
    },

    /// The id spent all creation attempts for the current window
    #[error("Retry budget exhausted for {id}, resets in {}ms", retry_in.as_millis())]
    RetryBudgetExhausted {
        /// Connection id
        id: String,
        /// Time until the budget window resets
        retry_in: Duration,
    },

    /// The pool is at capacity and nothing could be swept
    #[error("Connection pool exhausted (max {max} connections)")]
    PoolExhausted {
        /// Configured capacity
        max: usize,
    },

    /// The realtime client failed to create the channel
    #[error("Failed to create channel for {id}: {source}")]
    CreateFailed {
        /// Connection id
        id: String,
        /// Underlying client error
        #[source]
        source: ChannelError,
    },

    /// `cleanup()` has run
    #[error("Connection pool is shut down")]
    ShutDown,
}

impl PoolError {
    /// Whether the request was refused without contacting the backend
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::CreateFailed { .. })
    }
}
