//! Connection Health Tracking
//!
//! Per-connection liveness state. The health monitor updates it after each
//! probe and the pool updates it after each creation attempt.
//!
//! # Status Classification
//!
//! | Consecutive failures | Status     |
//! |----------------------|------------|
//! | 0                    | Healthy    |
//! | 1 - 3                | Degraded   |
//! | > 3                  | Dead       |
//!
//! A probe that finds the channel closed or errored reports `Unhealthy`
//! until the failure count alone classifies the connection as dead.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Highest failure count still classified as degraded
pub const DEGRADED_MAX_FAILURES: u32 = 3;

/// Coarse liveness classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Last probe succeeded
    Healthy,
    /// Recent failures, still worth keeping
    Degraded,
    /// Channel reported a terminal state
    Unhealthy,
    /// Too many failures, will be evicted
    Dead,
}

impl HealthStatus {
    /// Classify purely by consecutive failure count
    #[must_use]
    pub fn from_failures(consecutive_failures: u32) -> Self {
        match consecutive_failures {
            0 => Self::Healthy,
            1..=DEGRADED_MAX_FAILURES => Self::Degraded,
            _ => Self::Dead,
        }
    }

    /// Only healthy connections are handed out again
    #[must_use]
    pub fn is_reusable(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// Why a connection left the pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Classified dead
    Dead,
    /// No activity within the staleness threshold
    Stale,
    /// Failure count above the eviction threshold
    FailureHeavy,
    /// Replaced by a fresh channel for the same id
    Replaced,
    /// Removed by the caller
    Removed,
    /// Pool shut down
    Shutdown,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dead => write!(f, "dead"),
            Self::Stale => write!(f, "stale"),
            Self::FailureHeavy => write!(f, "failure-heavy"),
            Self::Replaced => write!(f, "replaced"),
            Self::Removed => write!(f, "removed"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Thresholds used by the cleanup sweep
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Inactivity after which a connection is stale
    pub stale_after: Duration,
    /// Failures above which a connection is evicted regardless of status
    pub max_consecutive_failures: u32,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            max_consecutive_failures: 5,
        }
    }
}

/// Liveness state for one connection id
#[derive(Clone, Debug)]
pub struct ConnectionHealth {
    /// Connection id
    pub id: String,
    /// Current classification
    pub status: HealthStatus,
    /// When the last successful probe completed
    pub last_ping: Option<Instant>,
    /// Latency of the last successful probe
    pub ping_latency: Duration,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// When this record was created
    pub created_at: Instant,
    /// Last time the connection was handed out or created
    pub last_activity: Instant,
}

impl ConnectionHealth {
    /// Fresh, healthy state
    pub fn new(id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            status: HealthStatus::Healthy,
            last_ping: None,
            ping_latency: Duration::ZERO,
            consecutive_failures: 0,
            created_at: now,
            last_activity: now,
        }
    }

    /// State for an id whose first creation attempt failed
    pub(crate) fn failed(id: impl Into<String>) -> Self {
        let mut health = Self::new(id);
        health.record_failure();
        health
    }

    /// Mark the connection as used
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Record a successful probe; returns the previous status
    pub fn record_probe_success(&mut self, latency: Duration) -> HealthStatus {
        let previous = self.status;
        self.last_ping = Some(Instant::now());
        self.ping_latency = latency;
        self.consecutive_failures = 0;
        self.status = HealthStatus::Healthy;
        previous
    }

    /// Record a failed probe or creation; returns the previous status
    pub fn record_failure(&mut self) -> HealthStatus {
        let previous = self.status;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.status = HealthStatus::from_failures(self.consecutive_failures);
        previous
    }

    /// Record a probe that found the channel closed or errored
    pub fn record_terminal_state(&mut self) -> HealthStatus {
        let previous = self.record_failure();
        if self.status != HealthStatus::Dead {
            self.status = HealthStatus::Unhealthy;
        }
        previous
    }

    /// Time since the connection was last used
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Whether the cleanup sweep should drop this connection
    #[must_use]
    pub fn eviction_reason(&self, policy: &EvictionPolicy, now: Instant) -> Option<EvictionReason> {
        if self.status == HealthStatus::Dead {
            Some(EvictionReason::Dead)
        } else if self.consecutive_failures > policy.max_consecutive_failures {
            Some(EvictionReason::FailureHeavy)
        } else if self.idle_for(now) > policy.stale_after {
            Some(EvictionReason::Stale)
        } else {
            None
        }
    }
}
