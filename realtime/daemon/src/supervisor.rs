//! Topic Supervisor
//!
//! Keeps a fixed set of realtime topics held open through the pool. Every
//! refresh re-requests each topic: healthy channels are reused, dead ones are
//! replaced, and rejections (open circuit, spent budget, full pool) are
//! reported without stopping the others.

use std::time::Duration;

use realtime_core::{ConnectionMetrics, ConnectionPool, PoolError, PoolEvent, RealtimeClient};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Outcome of one refresh pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshReport {
    /// Topics with a live channel after the pass
    pub held: Vec<String>,
    /// Topics that could not be acquired, with the reason
    pub rejected: Vec<(String, String)>,
    /// Pool metrics taken at the end of the pass
    pub metrics: ConnectionMetrics,
}

impl RefreshReport {
    /// Whether every topic is held
    pub fn all_held(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Holds a set of topics open
pub struct TopicSupervisor<C: RealtimeClient> {
    pool: ConnectionPool<C>,
    topics: Vec<String>,
}

impl<C: RealtimeClient> TopicSupervisor<C> {
    /// Create a supervisor for `topics`; duplicates are dropped
    pub fn new(pool: ConnectionPool<C>, topics: impl IntoIterator<Item = String>) -> Self {
        let mut topics: Vec<String> = topics.into_iter().collect();
        topics.sort();
        topics.dedup();
        Self { pool, topics }
    }

    /// The supervised pool
    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// Topics under supervision
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Request every topic once
    pub async fn refresh(&self) -> RefreshReport {
        let mut report = RefreshReport::default();

        for topic in &self.topics {
            match self.pool.try_get_connection(topic).await {
                Ok(_) => report.held.push(topic.clone()),
                Err(e) => {
                    log_rejection(topic, &e);
                    report.rejected.push((topic.clone(), e.to_string()));
                }
            }
        }

        report.metrics = self.pool.metrics();
        report
    }

    /// Refresh every `period` until `shutdown` resolves
    pub async fn run<F>(&self, period: Duration, shutdown: F)
    where
        F: std::future::Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping refresh loop");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.refresh().await;
                    log_report(&report);
                }
            }
        }
    }
}

/// Log pool events until the pool is dropped
pub fn spawn_event_logger(mut events: mpsc::UnboundedReceiver<PoolEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let topic = event.connection_id().unwrap_or("-");
            match &event {
                PoolEvent::ConnectionFailed { .. } | PoolEvent::CircuitStateChanged { .. } => {
                    warn!(topic = %topic, event = ?event, "Pool event");
                }
                _ => debug!(topic = %topic, event = ?event, "Pool event"),
            }
        }
    })
}

fn log_rejection(topic: &str, error: &PoolError) {
    if error.is_rejection() {
        debug!(topic = %topic, error = %error, "Topic request rejected");
    } else {
        warn!(topic = %topic, error = %error, "Topic channel could not be created");
    }
}

fn log_report(report: &RefreshReport) {
    let metrics = serde_json::to_string(&report.metrics).unwrap_or_default();
    if report.all_held() {
        info!(
            held = report.held.len(),
            metrics = %metrics,
            "Refresh complete"
        );
    } else {
        warn!(
            held = report.held.len(),
            rejected = report.rejected.len(),
            metrics = %metrics,
            "Refresh incomplete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use realtime_core::{ChannelError, ChannelState, PoolConfig};

    #[derive(Clone, Default)]
    struct FakeClient {
        refused: Arc<Mutex<HashSet<String>>>,
        created: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RealtimeClient for FakeClient {
        type Channel = String;

        async fn create(&self, id: &str) -> Result<String, ChannelError> {
            self.created.lock().unwrap().push(id.to_string());
            if self.refused.lock().unwrap().contains(id) {
                return Err(ChannelError::JoinRejected {
                    topic: id.to_string(),
                    reason: "unauthorized".to_string(),
                });
            }
            Ok(id.to_string())
        }

        async fn inspect_state(&self, _channel: &String) -> Result<ChannelState, ChannelError> {
            Ok(ChannelState::Joined)
        }

        async fn remove(&self, _channel: &String) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_refresh_holds_all_topics_with_one_create_each() {
        let client = FakeClient::default();
        let pool = ConnectionPool::new(client.clone(), PoolConfig::default());
        let supervisor = TopicSupervisor::new(pool, topics(&["b", "a", "b"]));

        assert_eq!(supervisor.topics(), &["a".to_string(), "b".to_string()]);

        supervisor.refresh().await;
        let report = supervisor.refresh().await;

        assert!(report.all_held());
        assert_eq!(report.held, topics(&["a", "b"]));
        assert_eq!(report.metrics.active_connections, 2);
        assert_eq!(client.created.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_reports_rejections_and_continues() {
        let client = FakeClient::default();
        client.refused.lock().unwrap().insert("locked".to_string());
        let pool = ConnectionPool::new(client, PoolConfig::default().with_max_connections(1));
        let supervisor = TopicSupervisor::new(pool, topics(&["locked", "open", "zzz"]));

        let report = supervisor.refresh().await;

        assert_eq!(report.held, topics(&["open"]));
        let rejected: Vec<&str> = report.rejected.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(rejected, vec!["locked", "zzz"]);
        assert_eq!(report.metrics.queued_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let client = FakeClient::default();
        let pool = ConnectionPool::new(client.clone(), PoolConfig::default());
        let supervisor = TopicSupervisor::new(pool, topics(&["a"]));

        supervisor
            .run(
                Duration::from_secs(1),
                tokio::time::sleep(Duration::from_millis(2500)),
            )
            .await;

        // Immediate tick plus ticks at 1s and 2s, all reusing one channel
        assert_eq!(client.created.lock().unwrap().len(), 1);
        assert!(supervisor.pool().contains("a"));
    }

    #[tokio::test]
    async fn test_event_logger_drains_until_pool_dropped() {
        let client = FakeClient::default();
        client.refused.lock().unwrap().insert("locked".to_string());
        let (pool, events) = ConnectionPool::with_events(client, PoolConfig::default());
        let logger = spawn_event_logger(events);

        let supervisor = TopicSupervisor::new(pool, topics(&["locked", "open"]));
        supervisor.refresh().await;
        drop(supervisor);

        tokio::time::timeout(Duration::from_secs(1), logger)
            .await
            .expect("logger stops once the pool is gone")
            .unwrap();
    }
}
