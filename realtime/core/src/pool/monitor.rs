//! Background Tasks
//!
//! Two periodic tasks keep the pool honest:
//!
//! - The health monitor probes every pooled channel, then sweeps dead, stale
//!   and failure-heavy entries.
//! - The metrics collector recomputes the aggregate snapshot.
//!
//! Each task holds a `Weak` reference and upgrades it once per tick, so it
//! never keeps a dropped pool alive. The first tick fires one full interval
//! after start.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::PoolInner;
use crate::channel::RealtimeClient;

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Spawn the probe-and-sweep loop
pub(super) fn spawn_health_monitor<C: RealtimeClient>(
    pool: Weak<PoolInner<C>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(interval_ms = period.as_millis() as u64, "Starting health monitor");
        let mut interval = ticker(period);

        loop {
            interval.tick().await;

            let Some(pool) = pool.upgrade() else {
                break;
            };
            if pool.is_shut_down() {
                break;
            }
            pool.check_health().await;
        }

        tracing::debug!("Health monitor stopped");
    })
}

/// Spawn the metrics aggregation loop
pub(super) fn spawn_metrics_collector<C: RealtimeClient>(
    pool: Weak<PoolInner<C>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(interval_ms = period.as_millis() as u64, "Starting metrics collector");
        let mut interval = ticker(period);

        loop {
            interval.tick().await;

            let Some(pool) = pool.upgrade() else {
                break;
            };
            if pool.is_shut_down() {
                break;
            }
            pool.collect_metrics();
        }

        tracing::debug!("Metrics collector stopped");
    })
}
