//! Connection Pool
//!
//! Bounded registry of realtime channels keyed by logical connection id.
//!
//! # Acquisition Order
//!
//! [`ConnectionPool::try_get_connection`] applies its checks in this order:
//!
//! 1. Circuit breaker admission (open circuit fails fast, expired circuit
//!    hands out one half-open trial)
//! 2. Retry budget for the id
//! 3. Reuse of an existing healthy channel
//! 4. Teardown of an existing unhealthy channel for the id
//! 5. Capacity (sweeping dead and stale entries once before rejecting)
//! 6. Creation through the [`RealtimeClient`]
//!
//! Steps 1, 2 and 5 never perform I/O. A half-open trial that ends before
//! step 6 is handed back so the next caller can take it.
//!
//! # Background Tasks
//!
//! [`ConnectionPool::start`] spawns the health monitor and the metrics
//! collector. Both hold a weak reference and exit when the last pool handle
//! is dropped or [`ConnectionPool::cleanup`] runs.

mod config;
mod events;
mod monitor;

pub use config::PoolConfig;
pub use events::PoolEvent;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::channel::{ChannelError, ChannelState, RealtimeClient};
use crate::circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerState, CircuitState, CircuitTransition,
};
use crate::error::PoolError;
use crate::health::{ConnectionHealth, EvictionReason};
use crate::metrics::{
    to_prometheus, CollectedMetrics, ConnectionMetrics, MetricsCollector, PoolCounterSnapshot,
    PoolCounters,
};
use crate::retry_budget::{RetryBudget, RetryBudgets};

// ============================================================================
// Internal State
// ============================================================================

struct PooledChannel<H> {
    handle: H,
    created_at: Instant,
}

struct PoolInner<C: RealtimeClient> {
    config: PoolConfig,
    client: C,
    channels: DashMap<String, PooledChannel<C::Channel>>,
    health: DashMap<String, ConnectionHealth>,
    breaker: CircuitBreaker,
    budgets: RetryBudgets,
    /// Creations in flight, counted against capacity
    pending: Mutex<usize>,
    counters: PoolCounters,
    collector: MetricsCollector,
    event_tx: Option<mpsc::UnboundedSender<PoolEvent>>,
    shut_down: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Capacity reservation for one in-flight creation
struct CreationSlot<'a> {
    pending: &'a Mutex<usize>,
}

impl Drop for CreationSlot<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
    }
}

/// Hands an unused half-open trial back to the breaker on drop
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl TrialGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_trial();
        }
    }
}

// ============================================================================
// Connection Pool
// ============================================================================

/// Shared handle to a pool of realtime channels
///
/// Cloning is cheap; all clones refer to the same pool.
pub struct ConnectionPool<C: RealtimeClient> {
    inner: Arc<PoolInner<C>>,
}

impl<C: RealtimeClient> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: RealtimeClient> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("active_connections", &self.inner.channels.len())
            .field("circuit", &self.inner.breaker.state())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl<C: RealtimeClient> ConnectionPool<C> {
    /// Create a pool without an event channel
    #[must_use]
    pub fn new(client: C, config: PoolConfig) -> Self {
        Self::build(client, config, None)
    }

    /// Create a pool that reports [`PoolEvent`]s
    #[must_use]
    pub fn with_events(client: C, config: PoolConfig) -> (Self, mpsc::UnboundedReceiver<PoolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::build(client, config, Some(tx)), rx)
    }

    fn build(
        client: C,
        config: PoolConfig,
        event_tx: Option<mpsc::UnboundedSender<PoolEvent>>,
    ) -> Self {
        let inner = PoolInner {
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            budgets: RetryBudgets::new(config.retry_budget.clone()),
            config,
            client,
            channels: DashMap::new(),
            health: DashMap::new(),
            pending: Mutex::new(0),
            counters: PoolCounters::default(),
            collector: MetricsCollector::new(),
            event_tx,
            shut_down: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the realtime client
    #[must_use]
    pub fn client(&self) -> &C {
        &self.inner.client
    }

    /// Spawn the health monitor and metrics collector
    ///
    /// Must be called from within a tokio runtime. Calling it again while the
    /// tasks are running does nothing.
    pub fn start(&self) {
        if self.is_shut_down() {
            tracing::warn!("Cannot start background tasks on a shut down pool");
            return;
        }

        let mut tasks = self.inner.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        tasks.push(monitor::spawn_health_monitor(
            weak.clone(),
            self.inner.config.health_check_interval,
        ));
        tasks.push(monitor::spawn_metrics_collector(
            weak,
            self.inner.config.metrics_interval,
        ));

        tracing::info!(
            max_connections = self.inner.config.max_connections,
            health_interval_ms = self.inner.config.health_check_interval.as_millis() as u64,
            metrics_interval_ms = self.inner.config.metrics_interval.as_millis() as u64,
            "Connection pool started"
        );
    }

    /// Get a channel for `id`, or `None` if the request was refused
    ///
    /// The refusal reason is logged. Use
    /// [`try_get_connection`](Self::try_get_connection) to receive it.
    pub async fn get_connection(&self, id: &str) -> Option<C::Channel> {
        self.try_get_connection(id).await.ok()
    }

    /// Get a channel for `id`, reusing a healthy one when possible
    ///
    /// # Errors
    ///
    /// Returns a [`PoolError`] when the circuit is open, the id's retry budget
    /// is spent, the pool is full, the client fails to create the channel, or
    /// the pool has been shut down.
    pub async fn try_get_connection(&self, id: &str) -> Result<C::Channel, PoolError> {
        self.inner.acquire(id).await
    }

    /// Unregister `id` and tear its channel down
    ///
    /// Unknown ids are ignored. Teardown errors are logged.
    pub async fn remove_connection(&self, id: &str) {
        self.inner.health.remove(id);
        if let Some((_, channel)) = self.inner.channels.remove(id) {
            self.inner
                .teardown(id, channel, EvictionReason::Removed)
                .await;
        }
    }

    /// Current aggregate metrics
    #[must_use]
    pub fn metrics(&self) -> ConnectionMetrics {
        self.inner.compute_metrics()
    }

    /// Compute metrics and store them as the latest snapshot
    pub fn collect_metrics(&self) -> ConnectionMetrics {
        self.inner.collect_metrics()
    }

    /// Snapshot stored by the most recent metrics collection
    #[must_use]
    pub fn last_metrics(&self) -> Option<CollectedMetrics> {
        self.inner.collector.latest()
    }

    /// Health of every tracked connection, ordered by id
    #[must_use]
    pub fn health_status(&self) -> Vec<ConnectionHealth> {
        self.inner.health_snapshot()
    }

    /// Health of one connection
    #[must_use]
    pub fn connection_health(&self, id: &str) -> Option<ConnectionHealth> {
        self.inner.health.get(id).map(|h| h.clone())
    }

    /// Lifetime counters
    #[must_use]
    pub fn counters(&self) -> PoolCounterSnapshot {
        self.inner.counters.snapshot()
    }

    /// Circuit breaker state
    #[must_use]
    pub fn circuit_breaker(&self) -> CircuitBreakerState {
        self.inner.breaker.snapshot()
    }

    /// Retry budget for `id`, if one has been recorded
    #[must_use]
    pub fn retry_budget(&self, id: &str) -> Option<RetryBudget> {
        self.inner.budgets.get(id)
    }

    /// Metrics and counters in Prometheus text format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let metrics = self.inner.compute_metrics();
        let health = self.inner.health_snapshot();
        to_prometheus(&metrics, &self.inner.counters.snapshot(), &health)
    }

    /// Probe every pooled channel, then sweep
    pub async fn run_health_check(&self) {
        self.inner.check_health().await;
    }

    /// Evict dead, stale and failure-heavy connections; returns how many
    pub async fn sweep(&self) -> usize {
        self.inner.sweep().await
    }

    /// Number of pooled channels
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.channels.len()
    }

    /// Whether no channels are pooled
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.channels.is_empty()
    }

    /// Whether a channel is pooled for `id`
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.channels.contains_key(id)
    }

    /// Whether [`cleanup`](Self::cleanup) has run
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Stop the background tasks and tear down every channel
    ///
    /// Later acquisitions fail with [`PoolError::ShutDown`]. Safe to call
    /// more than once.
    pub async fn cleanup(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.abort_tasks();

        let ids: Vec<String> = self
            .inner
            .channels
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let count = ids.len();

        for id in ids {
            if let Some((_, channel)) = self.inner.channels.remove(&id) {
                self.inner
                    .teardown(&id, channel, EvictionReason::Shutdown)
                    .await;
            }
        }

        self.inner.health.clear();
        self.inner.budgets.clear();
        self.inner.collector.clear();

        tracing::info!(channels_closed = count, "Connection pool shut down");
    }
}

// ============================================================================
// Acquisition
// ============================================================================

impl<C: RealtimeClient> PoolInner<C> {
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn emit(&self, event: PoolEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn emit_transition(&self, transition: Option<CircuitTransition>) {
        if let Some(t) = transition {
            self.emit(PoolEvent::CircuitStateChanged {
                from: t.from,
                to: t.to,
            });
        }
    }

    async fn acquire(&self, id: &str) -> Result<C::Channel, PoolError> {
        if self.is_shut_down() {
            return Err(PoolError::ShutDown);
        }

        let before = self.breaker.state();
        let admission = self.breaker.admit();
        let mut trial = match admission {
            Admission::Allowed => TrialGuard {
                breaker: &self.breaker,
                armed: false,
            },
            Admission::Trial => {
                tracing::info!(connection_id = %id, "Attempting half-open trial connection");
                if before == CircuitState::Open {
                    self.emit(PoolEvent::CircuitStateChanged {
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                    });
                }
                TrialGuard {
                    breaker: &self.breaker,
                    armed: true,
                }
            }
            Admission::Rejected { retry_in } => {
                self.counters.circuit_rejections.inc();
                tracing::warn!(
                    connection_id = %id,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "Circuit breaker open - rejecting connection request"
                );
                return Err(PoolError::CircuitOpen { retry_in });
            }
        };

        if let Err(retry_in) = self.budgets.check(id) {
            self.counters.budget_rejections.inc();
            tracing::warn!(
                connection_id = %id,
                resets_in_ms = retry_in.as_millis() as u64,
                "Retry budget exhausted - rejecting connection request"
            );
            return Err(PoolError::RetryBudgetExhausted {
                id: id.to_string(),
                retry_in,
            });
        }

        if let Some(handle) = self.reuse(id) {
            tracing::trace!(connection_id = %id, "Reusing healthy channel");
            return Ok(handle);
        }

        if let Some((_, stale)) = self.channels.remove(id) {
            self.teardown(id, stale, EvictionReason::Replaced).await;
        }

        let slot = match self.reserve_slot() {
            Some(slot) => slot,
            None => {
                self.sweep().await;
                match self.reserve_slot() {
                    Some(slot) => slot,
                    None => {
                        self.counters.queued_requests.inc();
                        tracing::warn!(
                            connection_id = %id,
                            max_connections = self.config.max_connections,
                            "Connection pool exhausted"
                        );
                        return Err(PoolError::PoolExhausted {
                            max: self.config.max_connections,
                        });
                    }
                }
            }
        };

        tracing::debug!(connection_id = %id, "Creating realtime channel");
        let result = self.client.create(id).await;
        trial.disarm();

        match result {
            Ok(handle) => self.register(id, handle, slot, admission).await,
            Err(error) => {
                drop(slot);
                Err(self.record_create_failure(id, error, admission))
            }
        }
    }

    fn reuse(&self, id: &str) -> Option<C::Channel> {
        let handle = self.channels.get(id).map(|c| c.handle.clone())?;
        let mut health = self.health.get_mut(id)?;
        if !health.status.is_reusable() {
            return None;
        }
        health.touch();
        Some(handle)
    }

    fn reserve_slot(&self) -> Option<CreationSlot<'_>> {
        let mut pending = self.pending.lock();
        if self.channels.len() + *pending >= self.config.max_connections {
            return None;
        }
        *pending += 1;
        Some(CreationSlot {
            pending: &self.pending,
        })
    }

    async fn register(
        &self,
        id: &str,
        handle: C::Channel,
        slot: CreationSlot<'_>,
        admission: Admission,
    ) -> Result<C::Channel, PoolError> {
        let transition = self.breaker.record_success(admission);
        self.emit_transition(transition);

        if self.is_shut_down() {
            drop(slot);
            if let Err(e) = self.client.remove(&handle).await {
                tracing::debug!(connection_id = %id, error = %e, "Teardown after shutdown failed");
            }
            return Err(PoolError::ShutDown);
        }

        let winner = match self.channels.entry(id.to_string()) {
            Entry::Occupied(existing) => Some(existing.get().handle.clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(PooledChannel {
                    handle: handle.clone(),
                    created_at: Instant::now(),
                });
                None
            }
        };
        drop(slot);

        if let Some(existing) = winner {
            tracing::debug!(connection_id = %id, "Lost creation race, keeping existing channel");
            if let Err(e) = self.client.remove(&handle).await {
                tracing::warn!(connection_id = %id, error = %e, "Failed to tear down duplicate channel");
            }
            return Ok(existing);
        }

        self.health.insert(id.to_string(), ConnectionHealth::new(id));
        self.counters.channels_created.inc();
        self.emit(PoolEvent::ConnectionCreated { id: id.to_string() });
        tracing::info!(
            connection_id = %id,
            active = self.channels.len(),
            "Realtime channel created"
        );
        Ok(handle)
    }

    fn record_create_failure(
        &self,
        id: &str,
        error: ChannelError,
        admission: Admission,
    ) -> PoolError {
        let consecutive_failures = {
            let entry = self
                .health
                .entry(id.to_string())
                .and_modify(|h| {
                    h.record_failure();
                })
                .or_insert_with(|| ConnectionHealth::failed(id));
            entry.consecutive_failures
        };

        let transition = self.breaker.record_failure(admission);
        self.emit_transition(transition);
        let remaining = self.budgets.consume(id);
        self.counters.creation_failures.inc();

        tracing::warn!(
            connection_id = %id,
            error = %error,
            consecutive_failures,
            budget_remaining = remaining,
            "Failed to create realtime channel"
        );
        self.emit(PoolEvent::ConnectionFailed {
            id: id.to_string(),
            error: error.to_string(),
            consecutive_failures,
        });

        PoolError::CreateFailed {
            id: id.to_string(),
            source: error,
        }
    }

    async fn teardown(&self, id: &str, channel: PooledChannel<C::Channel>, reason: EvictionReason) {
        if let Err(e) = self.client.remove(&channel.handle).await {
            tracing::warn!(
                connection_id = %id,
                error = %e,
                "Channel teardown failed"
            );
        }
        self.counters.channels_closed.inc();
        tracing::info!(
            connection_id = %id,
            reason = %reason,
            age_secs = channel.created_at.elapsed().as_secs(),
            "Realtime channel removed"
        );
        self.emit(PoolEvent::ConnectionEvicted {
            id: id.to_string(),
            reason,
        });
    }

    // ========================================================================
    // Health
    // ========================================================================

    async fn check_health(&self) {
        let targets: Vec<(String, C::Channel)> = self
            .channels
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().handle.clone()))
            .collect();

        for (id, handle) in targets {
            let started = Instant::now();
            let outcome =
                tokio::time::timeout(self.config.probe_timeout, self.client.inspect_state(&handle))
                    .await;
            self.record_probe(&id, outcome, started.elapsed());
        }

        self.sweep().await;
    }

    fn record_probe(
        &self,
        id: &str,
        outcome: Result<Result<ChannelState, ChannelError>, tokio::time::error::Elapsed>,
        latency: Duration,
    ) {
        let Some(mut health) = self.health.get_mut(id) else {
            return;
        };

        let (previous, succeeded) = match outcome {
            Ok(Ok(state)) if state.is_joined() => (health.record_probe_success(latency), true),
            Ok(Ok(state)) if state.is_terminal() => {
                tracing::debug!(connection_id = %id, state = %state, "Channel in terminal state");
                (health.record_terminal_state(), false)
            }
            Ok(Ok(state)) => {
                tracing::debug!(connection_id = %id, state = %state, "Channel not joined");
                (health.record_failure(), false)
            }
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %id, error = %e, "Probe failed");
                (health.record_failure(), false)
            }
            Err(_) => {
                tracing::debug!(
                    connection_id = %id,
                    timeout_ms = self.config.probe_timeout.as_millis() as u64,
                    "Probe timed out"
                );
                (health.record_failure(), false)
            }
        };

        let current = health.status;
        let failures = health.consecutive_failures;
        drop(health);

        if !succeeded {
            self.counters.probe_failures.inc();
        }

        if previous != current {
            if succeeded {
                tracing::info!(connection_id = %id, from = %previous, "Connection recovered");
            } else {
                tracing::warn!(
                    connection_id = %id,
                    from = %previous,
                    to = %current,
                    consecutive_failures = failures,
                    "Connection health degraded"
                );
            }
            self.emit(PoolEvent::HealthChanged {
                id: id.to_string(),
                from: previous,
                to: current,
                latency: succeeded.then_some(latency),
            });
        }
    }

    async fn sweep(&self) -> usize {
        let policy = &self.config.eviction;
        let now = Instant::now();

        let candidates: Vec<(String, EvictionReason)> = self
            .health
            .iter()
            .filter_map(|h| {
                h.eviction_reason(policy, now)
                    .map(|reason| (h.key().clone(), reason))
            })
            .collect();

        let mut evicted = 0;
        for (id, reason) in candidates {
            // Re-check: a concurrent creation may have refreshed the entry
            let removed = self
                .health
                .remove_if(&id, |_, h| h.eviction_reason(policy, now).is_some());
            if removed.is_none() {
                continue;
            }
            evicted += 1;

            match self.channels.remove(&id) {
                Some((_, channel)) => self.teardown(&id, channel, reason).await,
                None => {
                    tracing::debug!(connection_id = %id, reason = %reason, "Dropped health record");
                    self.emit(PoolEvent::ConnectionEvicted { id, reason });
                }
            }
        }

        let pruned = self.budgets.prune_expired();
        if evicted > 0 || pruned > 0 {
            tracing::debug!(evicted, budgets_pruned = pruned, "Pool sweep complete");
        }
        evicted
    }

    fn health_snapshot(&self) -> Vec<ConnectionHealth> {
        let mut health: Vec<ConnectionHealth> =
            self.health.iter().map(|h| h.value().clone()).collect();
        health.sort_by(|a, b| a.id.cmp(&b.id));
        health
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    fn compute_metrics(&self) -> ConnectionMetrics {
        let health = self.health_snapshot();
        ConnectionMetrics::compute(
            self.channels.len(),
            &health,
            self.counters.queued_requests.get(),
            self.breaker.state(),
        )
    }

    fn collect_metrics(&self) -> ConnectionMetrics {
        let metrics = self.compute_metrics();
        self.collector.publish(metrics.clone());
        metrics
    }

    fn abort_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
    }
}

impl<C: RealtimeClient> Drop for PoolInner<C> {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
