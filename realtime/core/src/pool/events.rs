//! Pool Events
//!
//! Emitted on an unbounded channel when the pool is built with
//! [`ConnectionPool::with_events`](super::ConnectionPool::with_events).
//! Sends never block; a dropped receiver silently disables emission.

use std::time::Duration;

use crate::circuit_breaker::CircuitState;
use crate::health::{EvictionReason, HealthStatus};

/// Lifecycle and health events for observability
#[derive(Clone, Debug, PartialEq)]
pub enum PoolEvent {
    /// A channel was created and registered
    ConnectionCreated {
        /// Connection id
        id: String,
    },
    /// A creation attempt failed
    ConnectionFailed {
        /// Connection id
        id: String,
        /// Client error message
        error: String,
        /// Failures since the last success for this id
        consecutive_failures: u32,
    },
    /// A probe changed a connection's status
    HealthChanged {
        /// Connection id
        id: String,
        /// Status before the probe
        from: HealthStatus,
        /// Status after the probe
        to: HealthStatus,
        /// Probe latency, when the probe succeeded
        latency: Option<Duration>,
    },
    /// A connection left the pool
    ConnectionEvicted {
        /// Connection id
        id: String,
        /// Why it was removed
        reason: EvictionReason,
    },
    /// The circuit breaker changed state
    CircuitStateChanged {
        /// Previous state
        from: CircuitState,
        /// New state
        to: CircuitState,
    },
}

impl PoolEvent {
    /// Connection id the event refers to, if any
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            Self::ConnectionCreated { id }
            | Self::ConnectionFailed { id, .. }
            | Self::HealthChanged { id, .. }
            | Self::ConnectionEvicted { id, .. } => Some(id),
            Self::CircuitStateChanged { .. } => None,
        }
    }
}
