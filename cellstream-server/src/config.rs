//! Server configuration.
//!
//! Loaded from YAML, TOML or JSON through [`ConfigLoader`], then overridden
//! from `CELLSTREAM_*` environment variables and validated.

use cellstream_core::config::{ConfigLoader, Configurable, Validatable};
use cellstream_core::error::ConfigError;
use cellstream_telemetry::logging::LogConfig;
use cellstream_telemetry::metrics::MetricsConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment variables overriding server configuration.
pub const ENV_PREFIX: &str = "CELLSTREAM";

/// Complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ListenConfig,

    /// Per-session settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Fan-out behavior.
    #[serde(default)]
    pub distribution: DistributionConfig,

    /// Demo value provider.
    #[serde(default)]
    pub provider: DemoProviderConfig,

    /// Shutdown settings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LogConfig,

    /// Metrics.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ServerConfig {
    /// Loads, overrides from the environment and validates a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::new()
            .with_env_prefix(ENV_PREFIX)
            .load_file(path)
    }
}

impl Validatable for ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::missing_field_in_section("host", "server"));
        }
        if !self.server.path.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "server.path",
                "must start with '/'",
            ));
        }
        if self.session.queue_capacity == 0 {
            return Err(ConfigError::invalid_value(
                "session.queue_capacity",
                "must be at least 1",
            ));
        }
        if self.provider.tick_interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "provider.tick_interval_ms",
                "must be at least 1",
            ));
        }
        if !(self.provider.volatility.is_finite() && self.provider.volatility >= 0.0) {
            return Err(ConfigError::invalid_value(
                "provider.volatility",
                "must be a non-negative number",
            ));
        }
        Ok(())
    }
}

impl Configurable for ServerConfig {
    fn apply_overrides<F>(&mut self, prefix: &str, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(&format!("{prefix}_HOST")) {
            self.server.host = host;
        }
        let port_var = format!("{prefix}_PORT");
        if let Some(port) = lookup(&port_var) {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnvVar {
                name: port_var.clone(),
                reason: format!("'{port}' is not a port number"),
            })?;
        }
        if let Some(level) = lookup(&format!("{prefix}_LOG_LEVEL")) {
            self.logging.level = level;
        }
        Ok(())
    }

    fn env_var_names(prefix: &str) -> Vec<String> {
        ["HOST", "PORT", "LOG_LEVEL"]
            .iter()
            .map(|name| format!("{prefix}_{name}"))
            .collect()
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port; 0 picks a free port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket route.
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
        }
    }
}

impl ListenConfig {
    /// Returns `host:port`.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_path() -> String {
    "/cellstream".to_string()
}

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Capacity of each session's outbound callback queue. A push to a full
    /// queue fails and removes the session.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

/// Fan-out behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Text pushed once to a session when it adds a subscription, before the
    /// first real value arrives.
    #[serde(default)]
    pub placeholder: Option<String>,

    /// Start a stopped server when the first session registers.
    #[serde(default)]
    pub auto_start: bool,
}

/// Demo value provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoProviderConfig {
    /// Interval between value ticks for live keys.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Relative size of each random-walk step.
    #[serde(default = "default_volatility")]
    pub volatility: f64,

    /// Number of demo portfolios.
    #[serde(default = "default_portfolios")]
    pub portfolios: u16,

    /// Positions per demo portfolio.
    #[serde(default = "default_positions_per_portfolio")]
    pub positions_per_portfolio: u16,

    /// Portfolios that report "not loaded" until positions are loaded.
    #[serde(default)]
    pub unloaded_portfolios: Vec<i32>,
}

impl Default for DemoProviderConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            volatility: default_volatility(),
            portfolios: default_portfolios(),
            positions_per_portfolio: default_positions_per_portfolio(),
            unloaded_portfolios: Vec::new(),
        }
    }
}

impl DemoProviderConfig {
    /// Returns the tick interval.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_volatility() -> f64 {
    0.01
}

fn default_portfolios() -> u16 {
    3
}

fn default_positions_per_portfolio() -> u16 {
    5
}

/// Shutdown settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Time allowed for open connections to drain.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ShutdownConfig {
    /// Returns the shutdown timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}
