//! Configuration loader supporting YAML, TOML and JSON.

use serde::de::DeserializeOwned;
use std::path::Path;

use super::traits::{Configurable, Validatable};
use crate::error::ConfigError;

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    /// YAML format (.yaml, .yml)
    #[default]
    Yaml,
    /// TOML format (.toml)
    Toml,
    /// JSON format (.json)
    Json,
}

impl ConfigFormat {
    /// Detects the format from a file extension.
    ///
    /// Returns `None` if the extension is not recognized.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "yaml" | "yml" => Some(Self::Yaml),
                "toml" => Some(Self::Toml),
                "json" => Some(Self::Json),
                _ => None,
            })
    }
}

/// Loads configuration files, then applies environment overrides and validation.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: Option<String>,
    validate: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader that validates and applies no environment overrides.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            env_prefix: None,
            validate: true,
        }
    }

    /// Sets the environment variable prefix for overrides (e.g. `CELLSTREAM`).
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Sets whether to validate the configuration after loading.
    #[must_use]
    pub const fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Returns the environment variable prefix, if set.
    #[must_use]
    pub fn env_prefix(&self) -> Option<&str> {
        self.env_prefix.as_deref()
    }

    /// Loads configuration from a file, detecting the format from its extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the extension is not
    /// recognized, the content does not parse, an override is malformed or
    /// validation fails.
    pub fn load_file<T, P>(&self, path: P) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Configurable + Validatable,
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::InvalidFormat {
            path: path.display().to_string(),
            reason: "Unrecognized file extension. Supported: .yaml, .yml, .toml, .json".to_string(),
        })?;

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut config: T = Self::parse(&content, format).map_err(|e| match e {
            ConfigError::InvalidFormat { reason, .. } => ConfigError::InvalidFormat {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })?;
        self.finish(&mut config)?;
        Ok(config)
    }

    /// Loads configuration from a string in the given format.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be parsed, an override is
    /// malformed or validation fails.
    pub fn load_str<T>(&self, content: &str, format: ConfigFormat) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Configurable + Validatable,
    {
        let mut config: T = Self::parse(content, format)?;
        self.finish(&mut config)?;
        Ok(config)
    }

    /// Parses content without overrides or validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFormat`] if the content cannot be parsed.
    pub fn parse<T>(content: &str, format: ConfigFormat) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
    {
        match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| parse_error("YAML", e)),
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| parse_error("TOML", e)),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| parse_error("JSON", e)),
        }
    }

    fn finish<T>(&self, config: &mut T) -> Result<(), ConfigError>
    where
        T: Configurable + Validatable,
    {
        if let Some(prefix) = &self.env_prefix {
            config.apply_env_overrides(prefix)?;
        }
        if self.validate {
            config.validate()?;
        }
        Ok(())
    }
}

fn parse_error(kind: &str, e: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidFormat {
        path: "<string>".to_string(),
        reason: format!("{kind} parse error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        host: String,
        #[serde(default)]
        port: u16,
    }

    impl Validatable for Sample {
        fn validate(&self) -> Result<(), ConfigError> {
            if self.port == 0 {
                return Err(ConfigError::invalid_value("port", "Port cannot be 0"));
            }
            Ok(())
        }
    }

    impl Configurable for Sample {
        fn apply_overrides<F>(&mut self, prefix: &str, lookup: F) -> Result<(), ConfigError>
        where
            F: Fn(&str) -> Option<String>,
        {
            if let Some(host) = lookup(&format!("{prefix}_HOST")) {
                self.host = host;
            }
            Ok(())
        }

        fn env_var_names(prefix: &str) -> Vec<String> {
            vec![format!("{prefix}_HOST")]
        }
    }

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_path(Path::new("a.TOML")), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_path(Path::new("a.ini")), None);
    }

    #[test]
    fn test_load_yaml_file() {
        let file = write_temp(".yaml", "host: 127.0.0.1\nport: 9100\n");
        let config: Sample = ConfigLoader::new().load_file(file.path()).unwrap();
        assert_eq!(
            config,
            Sample {
                host: "127.0.0.1".to_string(),
                port: 9100
            }
        );
    }

    #[test]
    fn test_load_toml_file() {
        let file = write_temp(".toml", "host = \"localhost\"\nport = 80\n");
        let config: Sample = ConfigLoader::new().load_file(file.path()).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 80);
    }

    #[test]
    fn test_unknown_extension() {
        let file = write_temp(".ini", "host=x");
        let result: Result<Sample, _> = ConfigLoader::new().load_file(file.path());
        assert!(matches!(result, Err(ConfigError::InvalidFormat { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result: Result<Sample, _> = ConfigLoader::new().load_file("/nonexistent/cellstream.yaml");
        assert!(matches!(result, Err(ConfigError::FileReadError { .. })));
    }

    #[test]
    fn test_parse_error_carries_path() {
        let file = write_temp(".json", "{ not json");
        let result: Result<Sample, _> = ConfigLoader::new().load_file(file.path());
        match result {
            Err(ConfigError::InvalidFormat { path, reason }) => {
                assert!(path.ends_with(".json"));
                assert!(reason.starts_with("JSON parse error"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_validation_toggle() {
        let content = r#"{"host": "h"}"#;
        let rejected: Result<Sample, _> = ConfigLoader::new().load_str(content, ConfigFormat::Json);
        assert!(rejected.is_err());

        let accepted: Sample = ConfigLoader::new()
            .with_validation(false)
            .load_str(content, ConfigFormat::Json)
            .unwrap();
        assert_eq!(accepted.port, 0);
    }
}
