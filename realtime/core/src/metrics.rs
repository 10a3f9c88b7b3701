//! Pool Metrics
//!
//! Observability for the channel pool:
//! - Monotonic counters for creations, failures and rejections
//! - Aggregated snapshots (active channels, mean probe latency, error rate,
//!   circuit breaker state)
//! - Prometheus text export
//!
//! Snapshots are derived data. Computing one never mutates pool or health
//! state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;

use crate::circuit_breaker::CircuitState;
use crate::health::{ConnectionHealth, HealthStatus};

// ============================================================================
// Counter
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Increment by one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Pool Counters
// ============================================================================

/// Lifetime counters for a pool
#[derive(Debug, Default)]
pub struct PoolCounters {
    /// Channels successfully created
    pub channels_created: Counter,
    /// Channels torn down (any reason)
    pub channels_closed: Counter,
    /// Failed creation attempts
    pub creation_failures: Counter,
    /// Failed liveness probes
    pub probe_failures: Counter,
    /// Requests rejected by the circuit breaker
    pub circuit_rejections: Counter,
    /// Requests rejected by an exhausted retry budget
    pub budget_rejections: Counter,
    /// Requests rejected because the pool was full
    pub queued_requests: Counter,
}

impl PoolCounters {
    /// Copy current values
    #[must_use]
    pub fn snapshot(&self) -> PoolCounterSnapshot {
        PoolCounterSnapshot {
            channels_created: self.channels_created.get(),
            channels_closed: self.channels_closed.get(),
            creation_failures: self.creation_failures.get(),
            probe_failures: self.probe_failures.get(),
            circuit_rejections: self.circuit_rejections.get(),
            budget_rejections: self.budget_rejections.get(),
            queued_requests: self.queued_requests.get(),
        }
    }
}

/// Point-in-time copy of [`PoolCounters`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolCounterSnapshot {
    /// Channels successfully created
    pub channels_created: u64,
    /// Channels torn down
    pub channels_closed: u64,
    /// Failed creation attempts
    pub creation_failures: u64,
    /// Failed liveness probes
    pub probe_failures: u64,
    /// Circuit breaker rejections
    pub circuit_rejections: u64,
    /// Retry budget rejections
    pub budget_rejections: u64,
    /// Capacity rejections
    pub queued_requests: u64,
}

// ============================================================================
// Connection Metrics
// ============================================================================

/// Aggregated pool snapshot
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConnectionMetrics {
    /// Connection ids with tracked health (pooled or recently failed)
    pub total_connections: usize,
    /// Channels currently held by the pool
    pub active_connections: usize,
    /// Requests rejected because the pool was full
    pub queued_requests: u64,
    /// Mean probe latency across tracked connections
    pub average_latency_ms: f64,
    /// Sum of consecutive failures divided by tracked connections
    pub error_rate: f64,
    /// Circuit breaker state at collection time
    pub circuit_breaker_state: CircuitState,
}

impl ConnectionMetrics {
    /// Aggregate a snapshot from pool state
    #[must_use]
    pub fn compute(
        active_connections: usize,
        health: &[ConnectionHealth],
        queued_requests: u64,
        circuit_breaker_state: CircuitState,
    ) -> Self {
        let tracked = health.len();
        let (average_latency_ms, error_rate) = if tracked == 0 {
            (0.0, 0.0)
        } else {
            let latency_sum: Duration = health.iter().map(|h| h.ping_latency).sum();
            let failure_sum: u64 = health
                .iter()
                .map(|h| u64::from(h.consecutive_failures))
                .sum();
            (
                latency_sum.as_secs_f64() * 1000.0 / tracked as f64,
                failure_sum as f64 / tracked as f64,
            )
        };

        Self {
            total_connections: tracked,
            active_connections,
            queued_requests,
            average_latency_ms,
            error_rate,
            circuit_breaker_state,
        }
    }
}

// ============================================================================
// Metrics Collector
// ============================================================================

/// Holds the most recent snapshot produced by the metrics task
#[derive(Debug, Default)]
pub struct MetricsCollector {
    latest: RwLock<Option<CollectedMetrics>>,
}

/// A snapshot plus when it was taken
#[derive(Clone, Debug)]
pub struct CollectedMetrics {
    /// The aggregated values
    pub metrics: ConnectionMetrics,
    /// Collection time
    pub collected_at: Instant,
}

impl MetricsCollector {
    /// Create an empty collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly computed snapshot
    pub fn publish(&self, metrics: ConnectionMetrics) {
        tracing::trace!(
            active = metrics.active_connections,
            tracked = metrics.total_connections,
            error_rate = metrics.error_rate,
            circuit = %metrics.circuit_breaker_state,
            "Pool metrics collected"
        );
        *self.latest.write() = Some(CollectedMetrics {
            metrics,
            collected_at: Instant::now(),
        });
    }

    /// Most recent snapshot, if the collector has run
    #[must_use]
    pub fn latest(&self) -> Option<CollectedMetrics> {
        self.latest.read().clone()
    }

    /// Forget the stored snapshot
    pub fn clear(&self) {
        *self.latest.write() = None;
    }
}

// ============================================================================
// Prometheus Export
// ============================================================================

fn circuit_state_value(state: CircuitState) -> u8 {
    match state {
        CircuitState::Closed => 0,
        CircuitState::HalfOpen => 1,
        CircuitState::Open => 2,
    }
}

/// Render metrics and counters in Prometheus text format
#[must_use]
pub fn to_prometheus(
    metrics: &ConnectionMetrics,
    counters: &PoolCounterSnapshot,
    health: &[ConnectionHealth],
) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "# HELP realtime_pool_active_connections Channels currently held by the pool\n\
         # TYPE realtime_pool_active_connections gauge\n\
         realtime_pool_active_connections {}\n\n",
        metrics.active_connections
    ));

    output.push_str(&format!(
        "# HELP realtime_pool_tracked_connections Connection ids with tracked health\n\
         # TYPE realtime_pool_tracked_connections gauge\n\
         realtime_pool_tracked_connections {}\n\n",
        metrics.total_connections
    ));

    output.push_str(&format!(
        "# HELP realtime_pool_average_latency_ms Mean probe latency\n\
         # TYPE realtime_pool_average_latency_ms gauge\n\
         realtime_pool_average_latency_ms {}\n\n",
        metrics.average_latency_ms
    ));

    output.push_str(&format!(
        "# HELP realtime_pool_error_rate Consecutive failures per tracked connection\n\
         # TYPE realtime_pool_error_rate gauge\n\
         realtime_pool_error_rate {}\n\n",
        metrics.error_rate
    ));

    output.push_str(&format!(
        "# HELP realtime_pool_circuit_state Circuit breaker state (0=closed, 1=half-open, 2=open)\n\
         # TYPE realtime_pool_circuit_state gauge\n\
         realtime_pool_circuit_state {}\n\n",
        circuit_state_value(metrics.circuit_breaker_state)
    ));

    let totals = [
        ("channels_created", "Channels created", counters.channels_created),
        ("channels_closed", "Channels torn down", counters.channels_closed),
        ("creation_failures", "Failed channel creations", counters.creation_failures),
        ("probe_failures", "Failed liveness probes", counters.probe_failures),
        ("circuit_rejections", "Requests rejected by the circuit breaker", counters.circuit_rejections),
        ("budget_rejections", "Requests rejected by retry budgets", counters.budget_rejections),
        ("queued_requests", "Requests rejected because the pool was full", counters.queued_requests),
    ];
    for (name, help, value) in totals {
        output.push_str(&format!(
            "# HELP realtime_pool_{name}_total {help}\n\
             # TYPE realtime_pool_{name}_total counter\n\
             realtime_pool_{name}_total {value}\n\n"
        ));
    }

    if !health.is_empty() {
        output.push_str(
            "# HELP realtime_connection_healthy Whether a connection is healthy\n\
             # TYPE realtime_connection_healthy gauge\n",
        );
        for h in health {
            output.push_str(&format!(
                "realtime_connection_healthy{{id=\"{}\"}} {}\n",
                h.id,
                u8::from(h.status == HealthStatus::Healthy)
            ));
        }
        output.push('\n');
    }

    output
}
