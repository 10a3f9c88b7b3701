//! Pool-Wide Circuit Breaker
//!
//! A single breaker guards channel creation for the whole pool. Repeated
//! creation failures trip it open; while open, requests are rejected without
//! touching the realtime backend. After a cooldown one trial creation is let
//! through to test recovery.
//!
//! ```text
//! +--------+  failures >= threshold  +------+   timeout elapsed   +-----------+
//! | Closed | ----------------------> | Open | ------------------> | Half-Open |
//! +--------+                         +------+                    +-----------+
//!     ^                                  ^                            |
//!     |            trial succeeds        |       trial fails          |
//!     +----------------------------------+----------------------------+
//! ```
//!
//! Time is read from `tokio::time::Instant` so cooldowns follow the runtime
//! clock (and can be advanced in paused-clock tests).

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ============================================================================
// State
// ============================================================================

/// Externally visible breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation
    #[default]
    Closed,
    /// Rejecting all creation attempts
    Open,
    /// One trial creation allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures needed to open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial is allowed
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the open-state timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of asking the breaker whether a creation may proceed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, proceed normally
    Allowed,
    /// Circuit half-open and this caller holds the single trial
    Trial,
    /// Circuit open (or trial already taken)
    Rejected {
        /// Time until the next trial becomes possible
        retry_in: Duration,
    },
}

impl Admission {
    /// Whether the caller may continue
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Point-in-time copy of the breaker's state
#[derive(Clone, Debug)]
pub struct CircuitBreakerState {
    /// Current state
    pub state: CircuitState,
    /// Failures counted since the last success
    pub failures: u32,
    /// When the most recent failure happened
    pub last_failure: Option<Instant>,
    /// Open-state timeout
    pub timeout: Duration,
    /// Failures needed to open
    pub threshold: u32,
}

/// A state change, reported so callers can log or emit events
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitTransition {
    /// State before the change
    pub from: CircuitState,
    /// State after the change
    pub to: CircuitState,
}

#[derive(Clone, Copy, Debug)]
enum Phase {
    Closed,
    Open { since: Instant },
    HalfOpen { trial_in_flight: bool },
}

impl Phase {
    fn state(self) -> CircuitState {
        match self {
            Self::Closed => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    failures: u32,
    last_failure: Option<Instant>,
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Global gate in front of channel creation
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Current state without side effects
    ///
    /// An open circuit whose timeout has elapsed still reports `Open` here;
    /// the move to half-open happens on the next [`admit`](Self::admit).
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().phase.state()
    }

    /// Ask whether a creation attempt may proceed
    ///
    /// Moves an expired open circuit to half-open and hands the caller the
    /// trial. A caller that receives [`Admission::Trial`] must later call
    /// [`record_success`](Self::record_success),
    /// [`record_failure`](Self::record_failure) or
    /// [`release_trial`](Self::release_trial).
    pub fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Closed => Admission::Allowed,
            Phase::Open { since } => {
                let elapsed = Instant::now().saturating_duration_since(since);
                if elapsed >= self.config.timeout {
                    inner.phase = Phase::HalfOpen {
                        trial_in_flight: true,
                    };
                    tracing::info!(
                        failures = inner.failures,
                        "Circuit breaker transitioning to half-open"
                    );
                    Admission::Trial
                } else {
                    Admission::Rejected {
                        retry_in: self.config.timeout - elapsed,
                    }
                }
            }
            Phase::HalfOpen {
                trial_in_flight: true,
            } => Admission::Rejected {
                retry_in: Duration::ZERO,
            },
            Phase::HalfOpen {
                trial_in_flight: false,
            } => {
                inner.phase = Phase::HalfOpen {
                    trial_in_flight: true,
                };
                Admission::Trial
            }
        }
    }

    /// Give back a trial that ended without a creation attempt
    pub fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if let Phase::HalfOpen {
            trial_in_flight: true,
        } = inner.phase
        {
            inner.phase = Phase::HalfOpen {
                trial_in_flight: false,
            };
        }
    }

    /// Record a successful creation made under `admission`
    ///
    /// Any success clears the failure count. Only the half-open trial closes
    /// the circuit; a creation admitted earlier that completes while the
    /// circuit is open or another caller holds the trial leaves the state as
    /// it is.
    pub fn record_success(&self, admission: Admission) -> Option<CircuitTransition> {
        let mut inner = self.inner.lock();
        inner.failures = 0;

        let closes = admission == Admission::Trial
            && matches!(
                inner.phase,
                Phase::HalfOpen {
                    trial_in_flight: true
                }
            );
        if !closes {
            return None;
        }

        inner.phase = Phase::Closed;
        tracing::info!("Circuit breaker closed - realtime backend recovered");
        Some(CircuitTransition {
            from: CircuitState::HalfOpen,
            to: CircuitState::Closed,
        })
    }

    /// Record a failed creation made under `admission`; may open the circuit
    ///
    /// A closed circuit opens at the threshold. A half-open circuit reopens
    /// only when the failure is the trial's own.
    pub fn record_failure(&self, admission: Admission) -> Option<CircuitTransition> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(now);

        let from = inner.phase.state();
        let should_open = match inner.phase {
            Phase::Closed => inner.failures >= self.config.failure_threshold,
            Phase::HalfOpen {
                trial_in_flight: true,
            } => admission == Admission::Trial,
            Phase::HalfOpen {
                trial_in_flight: false,
            }
            | Phase::Open { .. } => false,
        };

        if !should_open {
            return None;
        }

        inner.phase = Phase::Open { since: now };
        tracing::warn!(
            from = %from,
            failures = inner.failures,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Circuit breaker opened - rejecting new channels"
        );
        Some(CircuitTransition {
            from,
            to: CircuitState::Open,
        })
    }

    /// Copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            state: inner.phase.state(),
            failures: inner.failures,
            last_failure: inner.last_failure,
            timeout: self.config.timeout,
            threshold: self.config.failure_threshold,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
