//! Configuration traits for validation and environment overrides.

use crate::error::ConfigError;

/// Types that can check their own values after loading.
///
/// ```rust
/// use cellstream_core::config::Validatable;
/// use cellstream_core::error::ConfigError;
///
/// struct ListenConfig {
///     port: u16,
/// }
///
/// impl Validatable for ListenConfig {
///     fn validate(&self) -> Result<(), ConfigError> {
///         if self.port == 0 {
///             return Err(ConfigError::invalid_value("port", "Port cannot be 0"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Validatable {
    /// Returns `Ok(())` if the configuration is valid.
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Types whose values can be overridden from environment variables.
pub trait Configurable: Sized {
    /// Applies overrides read through `lookup`, named with `prefix`.
    ///
    /// `lookup` is usually `|name| std::env::var(name).ok()`; tests pass a map.
    fn apply_overrides<F>(&mut self, prefix: &str, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>;

    /// Applies overrides from the process environment.
    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        self.apply_overrides(prefix, |name| std::env::var(name).ok())
    }

    /// Returns the variable names consulted for `prefix`.
    fn env_var_names(prefix: &str) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct TestConfig {
        value: i32,
    }

    impl Validatable for TestConfig {
        fn validate(&self) -> Result<(), ConfigError> {
            if self.value < 0 {
                return Err(ConfigError::invalid_value("value", "must be non-negative"));
            }
            Ok(())
        }
    }

    impl Configurable for TestConfig {
        fn apply_overrides<F>(&mut self, prefix: &str, lookup: F) -> Result<(), ConfigError>
        where
            F: Fn(&str) -> Option<String>,
        {
            let name = format!("{prefix}_VALUE");
            if let Some(raw) = lookup(&name) {
                self.value = raw.parse().map_err(|_| ConfigError::InvalidEnvVar {
                    name,
                    reason: format!("'{raw}' is not an integer"),
                })?;
            }
            Ok(())
        }

        fn env_var_names(prefix: &str) -> Vec<String> {
            vec![format!("{prefix}_VALUE")]
        }
    }

    #[test]
    fn test_validatable() {
        assert!(TestConfig { value: 1 }.validate().is_ok());
        assert!(TestConfig { value: -1 }.validate().is_err());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([("APP_VALUE", "42")]);
        let mut config = TestConfig::default();
        config
            .apply_overrides("APP", |name| vars.get(name).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.value, 42);
        assert_eq!(TestConfig::env_var_names("APP"), vec!["APP_VALUE"]);
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut config = TestConfig::default();
        let result = config.apply_overrides("APP", |_| Some("abc".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }
}
