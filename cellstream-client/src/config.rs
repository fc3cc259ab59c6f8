//! Client configuration.

use cellstream_core::config::{ConfigLoader, Configurable, Validatable};
use cellstream_core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment variables overriding client configuration.
pub const ENV_PREFIX: &str = "CELLSTREAM_CLIENT";

/// WebSocket connector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Time allowed for the WebSocket handshake.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Time allowed for one call to be answered.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Inbound callback queue size, and event buffer per subscriber.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Reconnection policy used by the connection monitor.
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Loads, overrides from the environment and validates a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::new()
            .with_env_prefix(ENV_PREFIX)
            .load_file(path)
    }

    /// Returns the connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the call timeout.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Validatable for ClientConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "connect_timeout_ms",
                "must be at least 1",
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "call_timeout_ms",
                "must be at least 1",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid_value(
                "queue_capacity",
                "must be at least 1",
            ));
        }
        self.monitor.validate()
    }
}

impl Configurable for ClientConfig {
    fn apply_overrides<F>(&mut self, prefix: &str, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |suffix: &str| -> Result<Option<u64>, ConfigError> {
            let name = format!("{prefix}_{suffix}");
            lookup(&name)
                .map(|raw| {
                    raw.parse().map_err(|_| ConfigError::InvalidEnvVar {
                        name: name.clone(),
                        reason: format!("'{raw}' is not a number of milliseconds"),
                    })
                })
                .transpose()
        };

        if let Some(ms) = parse("CONNECT_TIMEOUT_MS")? {
            self.connect_timeout_ms = ms;
        }
        if let Some(ms) = parse("CALL_TIMEOUT_MS")? {
            self.call_timeout_ms = ms;
        }
        if let Some(ms) = parse("MONITOR_INTERVAL_MS")? {
            self.monitor.interval_ms = ms;
        }
        Ok(())
    }

    fn env_var_names(prefix: &str) -> Vec<String> {
        ["CONNECT_TIMEOUT_MS", "CALL_TIMEOUT_MS", "MONITOR_INTERVAL_MS"]
            .iter()
            .map(|name| format!("{prefix}_{name}"))
            .collect()
    }
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

fn default_queue_capacity() -> usize {
    1024
}

/// Reconnection policy of the connection monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between state checks.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Delay before the first retry after a failed reconnect.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound of the retry delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor of the retry delay.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl MonitorConfig {
    /// Returns the check interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Returns the delay before retry number `attempt` (0-based), growing
    /// exponentially up to `max_delay_ms`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }
}

impl Validatable for MonitorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "monitor.interval_ms",
                "must be at least 1",
            ));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(ConfigError::invalid_value(
                "monitor.backoff_multiplier",
                "must be a number of at least 1.0",
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::invalid_value(
                "monitor.max_delay_ms",
                "must not be below initial_delay_ms",
            ));
        }
        Ok(())
    }
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellstream_core::config::ConfigFormat;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.call_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff() {
        let monitor = MonitorConfig::default();
        assert_eq!(monitor.delay_for(0), Duration::from_millis(500));
        assert_eq!(monitor.delay_for(1), Duration::from_millis(1000));
        assert_eq!(monitor.delay_for(3), Duration::from_millis(4000));
        assert_eq!(monitor.delay_for(20), Duration::from_secs(30));
        assert_eq!(monitor.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_yaml() {
        let yaml = r"
call_timeout_ms: 250
monitor:
  interval_ms: 100
  backoff_multiplier: 1.5
";
        let config: ClientConfig = ConfigLoader::new()
            .load_str(yaml, ConfigFormat::Yaml)
            .unwrap();
        assert_eq!(config.call_timeout_ms, 250);
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.monitor.interval_ms, 100);
        assert!((config.monitor.backoff_multiplier - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"queue_capacity": 16}}"#).unwrap();
        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.queue_capacity, 16);
    }

    #[test]
    fn test_validation() {
        let mut config = ClientConfig::default();
        config.monitor.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.call_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars = HashMap::from([
            ("CELLSTREAM_CLIENT_CALL_TIMEOUT_MS", "750"),
            ("CELLSTREAM_CLIENT_MONITOR_INTERVAL_MS", "50"),
        ]);
        let mut config = ClientConfig::default();
        config
            .apply_overrides(ENV_PREFIX, |name| vars.get(name).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.call_timeout_ms, 750);
        assert_eq!(config.monitor.interval_ms, 50);

        let result = config.apply_overrides(ENV_PREFIX, |name| {
            name.ends_with("CONNECT_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }
}
