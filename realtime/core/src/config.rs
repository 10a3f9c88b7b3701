//! TOML Configuration File Support
//!
//! Loads pool and realtime endpoint settings from
//! `$XDG_CONFIG_HOME/realtime-pool/pool.toml`.
//!
//! # Configuration Priority
//!
//! Values are applied with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`REALTIME_POOL_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [pool]
//! max_connections = 25
//! health_check_interval_ms = 10000
//! metrics_interval_ms = 5000
//! stale_after_secs = 300
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! timeout_ms = 30000
//!
//! [retry_budget]
//! max_attempts = 5
//! window_secs = 60
//!
//! [realtime]
//! endpoint = "wss://project.example.co/realtime/v1/websocket"
//! api_key_env = "REALTIME_API_KEY"
//! join_timeout_ms = 10000
//! heartbeat_interval_secs = 30
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pool::PoolConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Realtime Endpoint Configuration
// =============================================================================

/// Where and how to reach the realtime backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// How long to wait for a join reply
    pub join_timeout: Duration,
    /// Interval between protocol heartbeats
    pub heartbeat_interval: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:4000/socket/websocket".to_string(),
            api_key_env: "REALTIME_API_KEY".to_string(),
            join_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl RealtimeConfig {
    /// Set the endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the join timeout
    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Read the API key from the configured environment variable
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(ConfigError::ValidationError(format!(
                "realtime endpoint must be a ws:// or wss:// URL, got {}",
                self.endpoint
            )));
        }
        if self.join_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "join_timeout must be non-zero".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "heartbeat_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Pool section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolToml {
    /// Maximum concurrent channels
    pub max_connections: Option<usize>,

    /// Health sweep interval in milliseconds
    pub health_check_interval_ms: Option<u64>,

    /// Metrics interval in milliseconds
    pub metrics_interval_ms: Option<u64>,

    /// Probe timeout in milliseconds
    pub probe_timeout_ms: Option<u64>,

    /// Inactivity threshold in seconds
    pub stale_after_secs: Option<u64>,

    /// Failures above which a connection is evicted
    pub max_consecutive_failures: Option<u32>,
}

/// Circuit breaker section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerToml {
    /// Failures needed to open the circuit
    pub failure_threshold: Option<u32>,

    /// Open-state timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Retry budget section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudgetToml {
    /// Attempts per window
    pub max_attempts: Option<u32>,

    /// Window length in seconds
    pub window_secs: Option<u64>,
}

/// Realtime endpoint section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeToml {
    /// WebSocket endpoint
    pub endpoint: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: Option<String>,

    /// Join timeout in milliseconds
    pub join_timeout_ms: Option<u64>,

    /// Heartbeat interval in seconds
    pub heartbeat_interval_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfigToml {
    /// Pool section
    pub pool: PoolToml,

    /// Circuit breaker section
    pub circuit_breaker: CircuitBreakerToml,

    /// Retry budget section
    pub retry_budget: RetryBudgetToml,

    /// Realtime endpoint section
    pub realtime: RealtimeToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration for a pool and its realtime client
#[derive(Clone, Debug)]
pub struct RealtimePoolConfig {
    /// Pool settings
    pub pool: PoolConfig,

    /// Realtime endpoint settings
    pub realtime: RealtimeConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RealtimePoolConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            realtime: RealtimeConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RealtimePoolConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check that the pool and client can run with these values
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        self.realtime.validate()
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/realtime-pool/pool.toml` or
/// `~/.config/realtime-pool/pool.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("realtime-pool").join("pool.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<RealtimePoolConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resulting values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RealtimePoolConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with a custom environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RealtimePoolConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = RealtimePoolConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: PoolConfigToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RealtimePoolConfig, toml: &PoolConfigToml) {
    // Pool
    if let Some(max) = toml.pool.max_connections {
        config.pool.max_connections = max;
    }
    if let Some(ms) = toml.pool.health_check_interval_ms {
        config.pool.health_check_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.pool.metrics_interval_ms {
        config.pool.metrics_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.pool.probe_timeout_ms {
        config.pool.probe_timeout = Duration::from_millis(ms);
    }
    if let Some(secs) = toml.pool.stale_after_secs {
        config.pool.eviction.stale_after = Duration::from_secs(secs);
    }
    if let Some(max) = toml.pool.max_consecutive_failures {
        config.pool.eviction.max_consecutive_failures = max;
    }

    // Circuit breaker
    if let Some(threshold) = toml.circuit_breaker.failure_threshold {
        config.pool.circuit_breaker.failure_threshold = threshold;
    }
    if let Some(ms) = toml.circuit_breaker.timeout_ms {
        config.pool.circuit_breaker.timeout = Duration::from_millis(ms);
    }

    // Retry budget
    if let Some(attempts) = toml.retry_budget.max_attempts {
        config.pool.retry_budget.max_attempts = attempts;
    }
    if let Some(secs) = toml.retry_budget.window_secs {
        config.pool.retry_budget.window = Duration::from_secs(secs);
    }

    // Realtime
    if let Some(ref endpoint) = toml.realtime.endpoint {
        config.realtime.endpoint = endpoint.clone();
    }
    if let Some(ref var) = toml.realtime.api_key_env {
        config.realtime.api_key_env = var.clone();
    }
    if let Some(ms) = toml.realtime.join_timeout_ms {
        config.realtime.join_timeout = Duration::from_millis(ms);
    }
    if let Some(secs) = toml.realtime.heartbeat_interval_secs {
        config.realtime.heartbeat_interval = Duration::from_secs(secs);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut RealtimePoolConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let parsed = |key: &str| -> Option<u64> {
        let value = env(key)?;
        match value.parse::<u64>() {
            Ok(n) => Some(n),
            Err(_) => {
                tracing::warn!(var = key, value = %value, "Ignoring non-numeric environment value");
                None
            }
        }
    };

    if let Some(n) = parsed("REALTIME_POOL_MAX_CONNECTIONS") {
        config.pool.max_connections = n as usize;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed("REALTIME_POOL_HEALTH_INTERVAL_MS") {
        config.pool.health_check_interval = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed("REALTIME_POOL_METRICS_INTERVAL_MS") {
        config.pool.metrics_interval = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(n) = parsed("REALTIME_POOL_FAILURE_THRESHOLD") {
        config.pool.circuit_breaker.failure_threshold = n as u32;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed("REALTIME_POOL_CIRCUIT_TIMEOUT_MS") {
        config.pool.circuit_breaker.timeout = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(n) = parsed("REALTIME_POOL_RETRY_ATTEMPTS") {
        config.pool.retry_budget.max_attempts = n as u32;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = parsed("REALTIME_POOL_RETRY_WINDOW_SECS") {
        config.pool.retry_budget.window = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(endpoint) = env("REALTIME_POOL_ENDPOINT") {
        config.realtime.endpoint = endpoint;
        config.source = ConfigSource::Env;
    }
    if let Some(var) = env("REALTIME_POOL_API_KEY_ENV") {
        config.realtime.api_key_env = var;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Capacity override
    pub max_connections: Option<usize>,

    /// Endpoint override
    pub endpoint: Option<String>,

    /// Health sweep interval override (seconds)
    pub health_check_interval_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set capacity override
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Set endpoint override
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set health sweep interval override
    #[must_use]
    pub fn with_health_check_interval_secs(mut self, secs: u64) -> Self {
        self.health_check_interval_secs = Some(secs);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut RealtimePoolConfig) {
        if self.max_connections.is_some()
            || self.endpoint.is_some()
            || self.health_check_interval_secs.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(max) = self.max_connections {
            config.pool.max_connections = max;
        }
        if let Some(ref endpoint) = self.endpoint {
            config.realtime.endpoint = endpoint.clone();
        }
        if let Some(secs) = self.health_check_interval_secs {
            config.pool.health_check_interval = Duration::from_secs(secs);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Defaults
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = RealtimePoolConfig::default();

        assert_eq!(config.pool, PoolConfig::default());
        assert_eq!(config.realtime.join_timeout, Duration::from_secs(10));
        assert_eq!(config.realtime.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("realtime-pool"));
            assert!(p.to_string_lossy().ends_with("pool.toml"));
        }
    }

    #[test]
    fn test_no_path_uses_defaults() {
        let config = load_config_with_env(None, no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/path/pool.toml");
        let config = load_config_with_env(Some(path), no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
    }

    // =========================================================================
    // TOML Parsing
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = write_toml(
            r#"
[pool]
max_connections = 25
health_check_interval_ms = 2000
metrics_interval_ms = 1000
stale_after_secs = 120
max_consecutive_failures = 8

[circuit_breaker]
failure_threshold = 3
timeout_ms = 15000

[retry_budget]
max_attempts = 2
window_secs = 30

[realtime]
endpoint = "wss://realtime.example.com/socket/websocket"
api_key_env = "MY_KEY"
join_timeout_ms = 2500
heartbeat_interval_secs = 20
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.pool.max_connections, 25);
        assert_eq!(config.pool.health_check_interval, Duration::from_secs(2));
        assert_eq!(config.pool.metrics_interval, Duration::from_secs(1));
        assert_eq!(config.pool.eviction.stale_after, Duration::from_secs(120));
        assert_eq!(config.pool.eviction.max_consecutive_failures, 8);
        assert_eq!(config.pool.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.pool.circuit_breaker.timeout, Duration::from_secs(15));
        assert_eq!(config.pool.retry_budget.max_attempts, 2);
        assert_eq!(config.pool.retry_budget.window, Duration::from_secs(30));
        assert_eq!(
            config.realtime.endpoint,
            "wss://realtime.example.com/socket/websocket"
        );
        assert_eq!(config.realtime.api_key_env, "MY_KEY");
        assert_eq!(config.realtime.join_timeout, Duration::from_millis(2500));
        assert_eq!(config.realtime.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = write_toml(
            r#"
[circuit_breaker]
failure_threshold = 9
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.pool.circuit_breaker.failure_threshold, 9);
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.pool.retry_budget.max_attempts, 5);
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_toml(
            r#"
[pool
max_connections = "lots"
"#,
        );

        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = write_toml("[pool]\nmax_connections = 0\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let file = write_toml("[realtime]\nendpoint = \"http://example.com\"\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_reports_first_bad_value() {
        let mut config = RealtimePoolConfig::default();
        config.realtime.heartbeat_interval = Duration::ZERO;
        match config.validate() {
            Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("heartbeat_interval")),
            other => panic!("expected a validation error, got {other:?}"),
        }

        config.pool.max_connections = 0;
        match config.validate() {
            Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("max_connections")),
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    // =========================================================================
    // Priority Ordering
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml(
            r#"
[pool]
max_connections = 25

[realtime]
endpoint = "ws://file.example.com/socket"
"#,
        );
        let env = env_from(&[
            ("REALTIME_POOL_MAX_CONNECTIONS", "40"),
            ("REALTIME_POOL_ENDPOINT", "wss://env.example.com/socket"),
        ]);

        let config = load_config_with_env(Some(file.path().to_path_buf()), env).unwrap();

        assert_eq!(config.pool.max_connections, 40);
        assert_eq!(config.realtime.endpoint, "wss://env.example.com/socket");
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_non_numeric_env_ignored() {
        let env = env_from(&[("REALTIME_POOL_RETRY_ATTEMPTS", "many")]);
        let config = load_config_with_env(None, env).unwrap();

        assert_eq!(config.pool.retry_budget.max_attempts, 5);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides_env() {
        let env = env_from(&[("REALTIME_POOL_MAX_CONNECTIONS", "40")]);
        let mut config = load_config_with_env(None, env).unwrap();
        assert_eq!(config.source(), ConfigSource::Env);

        ConfigOverrides::new()
            .with_max_connections(4)
            .apply(&mut config);

        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = RealtimePoolConfig::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }

    #[test]
    fn test_config_error_display() {
        let read_err = ConfigError::ReadError {
            path: PathBuf::from("/test/path"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let msg = read_err.to_string();
        assert!(msg.contains("/test/path"));
        assert!(msg.contains("Failed to read"));

        let msg = ConfigError::ValidationError("invalid value".to_string()).to_string();
        assert!(msg.contains("invalid value"));
    }
}
