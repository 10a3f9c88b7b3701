//! Realtime Core - Pooled Realtime Channels with Failure Isolation
//!
//! This crate keeps live-update subscriptions ("realtime channels") open
//! against a realtime backend, with the resource and failure discipline a
//! long-running client needs:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        ConnectionPool                          │
//! │                                                                │
//! │  get_connection(id)                                            │
//! │     │                                                          │
//! │     ├─▶ CircuitBreaker   (pool-wide closed/open/half-open)     │
//! │     ├─▶ RetryBudgets     (per-id attempts per window)          │
//! │     ├─▶ reuse healthy channel / evict unhealthy one            │
//! │     ├─▶ capacity check   (sweep dead + stale, then reject)     │
//! │     └─▶ RealtimeClient::create                                 │
//! │                                                                │
//! │  background: health monitor (probe + sweep), metrics collector │
//! └───────────────────────────────┬────────────────────────────────┘
//!                                 │
//!                      RealtimeClient trait
//!                                 │
//!              ┌──────────────────┴──────────────────┐
//!              │ PhoenixClient (feature "websocket") │
//!              └─────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use realtime_core::{ConnectionPool, PhoenixClient, PoolConfig, RealtimeConfig};
//!
//! let client = PhoenixClient::new(RealtimeConfig::default());
//! let pool = ConnectionPool::new(client, PoolConfig::default());
//! pool.start();
//!
//! if let Some(channel) = pool.get_connection("visit-42").await {
//!     // channel is joined and receiving updates
//! }
//!
//! pool.cleanup().await;
//! ```
//!
//! # Module Overview
//!
//! - [`channel`]: Realtime client boundary and the Phoenix WebSocket client
//! - [`circuit_breaker`]: Pool-wide circuit breaker
//! - [`retry_budget`]: Per-id retry budgets
//! - [`health`]: Per-connection health state and eviction rules
//! - [`metrics`]: Counters, aggregate snapshots and Prometheus export
//! - [`pool`]: The connection pool and its background tasks
//! - [`config`]: TOML / environment / CLI configuration loading
//! - [`error`]: Pool error type

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod retry_budget;

#[cfg(test)]
pub mod test_utils;

// Re-exports for convenience
pub use channel::{ChannelError, ChannelState, RealtimeClient};
#[cfg(feature = "websocket")]
pub use channel::{PhoenixChannel, PhoenixClient};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitState};
pub use error::PoolError;
pub use health::{ConnectionHealth, EvictionPolicy, EvictionReason, HealthStatus};
pub use metrics::{ConnectionMetrics, PoolCounterSnapshot};
pub use pool::{ConnectionPool, PoolConfig, PoolEvent};
pub use retry_budget::{RetryBudget, RetryBudgetConfig};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env, ConfigError,
    ConfigOverrides, ConfigSource, PoolConfigToml, RealtimeConfig, RealtimePoolConfig,
};
