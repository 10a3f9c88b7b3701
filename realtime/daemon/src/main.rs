//! Realtime Daemon - Holds Realtime Topics Open
//!
//! Runs a realtime-core connection pool against a Phoenix realtime endpoint
//! and keeps the requested topics subscribed, logging pool metrics after
//! every refresh.
//!
//! # Usage
//!
//! ```bash
//! # Hold two topics with defaults
//! realtime-daemon --topic visit-1 --topic visit-2
//!
//! # With config file and endpoint override
//! realtime-daemon --config /etc/realtime-pool/pool.toml --endpoint wss://rt.example.com/socket/websocket
//!
//! # One pass, print metrics as JSON, exit
//! realtime-daemon --topic visit-1 --once
//!
//! # Verbose logging
//! RUST_LOG=debug realtime-daemon --topic visit-1
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown (all channels are left)

mod supervisor;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use realtime_core::{
    default_config_path, load_config_from_path, ConfigOverrides, ConnectionPool, PhoenixClient,
    RealtimePoolConfig,
};
use tracing::{error, info, warn};

use supervisor::{spawn_event_logger, TopicSupervisor};

/// Realtime Daemon - Keeps realtime channels open through a managed pool
#[derive(Parser, Debug)]
#[command(name = "realtime-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Topic ids to hold open (repeatable)
    #[arg(short = 't', long = "topic", value_name = "ID", required = true)]
    topics: Vec<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "REALTIME_POOL_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override pool capacity
    #[arg(long, value_name = "N")]
    max_connections: Option<usize>,

    /// Override realtime endpoint
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    /// Override health check interval (seconds)
    #[arg(long, value_name = "SECS")]
    health_interval: Option<u64>,

    /// Seconds between topic refreshes
    #[arg(long, default_value_t = 15, value_name = "SECS")]
    refresh_secs: u64,

    /// Refresh once, print metrics JSON and exit
    #[arg(long)]
    once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "REALTIME_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(max) = self.max_connections {
            overrides = overrides.with_max_connections(max);
        }
        if let Some(ref endpoint) = self.endpoint {
            overrides = overrides.with_endpoint(endpoint.clone());
        }
        if let Some(secs) = self.health_interval {
            overrides = overrides.with_health_check_interval_secs(secs);
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "realtime_daemon={level},realtime_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();
}

/// Resolve file + environment configuration, then apply CLI overrides
fn build_config(args: &Args) -> Result<RealtimePoolConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path.clone())
        .with_context(|| format!("Failed to load configuration from {path:?}"))?;

    args.overrides().apply(&mut config);
    config
        .validate()
        .context("Invalid configuration after CLI overrides")?;

    Ok(config)
}

/// Resolves on SIGTERM or Ctrl-C
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, initiating shutdown"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT, initiating shutdown");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("Realtime daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&args)?;
    info!(
        source = %config.source(),
        endpoint = %config.realtime.endpoint,
        max_connections = config.pool.max_connections,
        "Configuration loaded"
    );

    let client = PhoenixClient::new(config.realtime.clone());
    let (pool, events) = ConnectionPool::with_events(client, config.pool.clone());
    let logger = spawn_event_logger(events);
    let supervisor = TopicSupervisor::new(pool, args.topics.clone());
    info!(topics = ?supervisor.topics(), "Supervising topics");

    if args.once {
        let report = supervisor.refresh().await;
        let json = serde_json::to_string_pretty(&report).context("Failed to encode report")?;
        println!("{json}");
        supervisor.pool().cleanup().await;
        return Ok(());
    }

    supervisor.pool().start();
    supervisor
        .run(Duration::from_secs(args.refresh_secs.max(1)), shutdown_signal())
        .await;

    info!("Shutting down...");
    supervisor.pool().cleanup().await;
    drop(supervisor);
    if let Err(e) = logger.await {
        warn!(error = %e, "Event logger task failed");
    }
    info!("Realtime daemon stopped cleanly");
    Ok(())
}
