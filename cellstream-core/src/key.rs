//! Subscription keys.
//!
//! A [`SubscriptionKey`] names one live datum a client can subscribe to.
//! Keys are immutable values with structural equality and hashing, so they
//! are used directly as map and set keys on both sides of the connection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Global properties of the host platform that can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SystemProperty {
    /// The date the portfolio is currently valued at.
    PortfolioDate,
}

impl SystemProperty {
    /// Returns all known system properties.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::PortfolioDate]
    }

    /// Returns the property name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PortfolioDate => "PortfolioDate",
        }
    }
}

impl fmt::Display for SystemProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a system property name is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown system property '{0}'")]
pub struct ParseSystemPropertyError(pub String);

impl FromStr for SystemProperty {
    type Err = ParseSystemPropertyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| ParseSystemPropertyError(s.to_string()))
    }
}

/// Category of a subscription key.
///
/// Inbound values are raised to exactly one application event per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyCategory {
    /// Position cell values
    Position,
    /// Portfolio cell values
    Portfolio,
    /// System property values
    System,
}

impl KeyCategory {
    /// Returns the category name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Portfolio => "portfolio",
            Self::System => "system",
        }
    }
}

/// Identity of a subscribable datum.
///
/// # Example
///
/// ```
/// use cellstream_core::{SubscriptionKey, SystemProperty};
///
/// let price = SubscriptionKey::position(5, "Price");
/// assert_eq!(price, SubscriptionKey::position(5, "Price"));
/// assert_eq!(price.to_string(), "position:5:Price");
///
/// let date = SubscriptionKey::System(SystemProperty::PortfolioDate);
/// assert_eq!(date.to_string(), "system:PortfolioDate");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SubscriptionKey {
    /// A column of a single position.
    Position {
        /// Position identifier
        id: i32,
        /// Column name as shown in the host platform
        column: String,
    },
    /// A column of a portfolio (folio) row.
    Portfolio {
        /// Portfolio identifier
        id: i32,
        /// Column name as shown in the host platform
        column: String,
    },
    /// A global system property.
    System(SystemProperty),
}

impl SubscriptionKey {
    /// Creates a position key.
    #[must_use]
    pub fn position(id: i32, column: impl Into<String>) -> Self {
        Self::Position {
            id,
            column: column.into(),
        }
    }

    /// Creates a portfolio key.
    #[must_use]
    pub fn portfolio(id: i32, column: impl Into<String>) -> Self {
        Self::Portfolio {
            id,
            column: column.into(),
        }
    }

    /// Creates a system property key.
    #[must_use]
    pub const fn system(property: SystemProperty) -> Self {
        Self::System(property)
    }

    /// Returns the category of this key.
    #[must_use]
    pub const fn category(&self) -> KeyCategory {
        match self {
            Self::Position { .. } => KeyCategory::Position,
            Self::Portfolio { .. } => KeyCategory::Portfolio,
            Self::System(_) => KeyCategory::System,
        }
    }

    /// Returns the spreadsheet formula that subscribes to this key.
    ///
    /// Used when copying a platform cell as a live reference.
    #[must_use]
    pub fn formula(&self) -> String {
        match self {
            Self::Position { id, column } => {
                format!("=GETPOSITIONVALUE({id},\"{}\")", column.replace('"', "\"\""))
            }
            Self::Portfolio { id, column } => {
                format!("=GETPORTFOLIOVALUE({id},\"{}\")", column.replace('"', "\"\""))
            }
            Self::System(SystemProperty::PortfolioDate) => "=GETPORTFOLIODATE()".to_string(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position { id, column } => write!(f, "position:{id}:{column}"),
            Self::Portfolio { id, column } => write!(f, "portfolio:{id}:{column}"),
            Self::System(property) => write!(f, "system:{property}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_structural_equality() {
        assert_eq!(
            SubscriptionKey::position(1, "Price"),
            SubscriptionKey::position(1, "Price")
        );
        assert_ne!(
            SubscriptionKey::position(1, "Price"),
            SubscriptionKey::portfolio(1, "Price")
        );
        assert_ne!(
            SubscriptionKey::position(1, "Price"),
            SubscriptionKey::position(1, "Delta")
        );
    }

    #[test]
    fn test_set_deduplicates() {
        let mut set = HashSet::new();
        set.insert(SubscriptionKey::position(5, "Price"));
        set.insert(SubscriptionKey::position(5, "Price".to_string()));
        set.insert(SubscriptionKey::system(SystemProperty::PortfolioDate));
        set.insert(SubscriptionKey::system(SystemProperty::PortfolioDate));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_category() {
        assert_eq!(
            SubscriptionKey::position(1, "a").category(),
            KeyCategory::Position
        );
        assert_eq!(
            SubscriptionKey::portfolio(1, "a").category(),
            KeyCategory::Portfolio
        );
        assert_eq!(
            SubscriptionKey::system(SystemProperty::PortfolioDate).category(),
            KeyCategory::System
        );
    }

    #[test]
    fn test_system_property_parse() {
        assert_eq!(
            "PortfolioDate".parse::<SystemProperty>(),
            Ok(SystemProperty::PortfolioDate)
        );
        assert_eq!(
            " portfoliodate ".parse::<SystemProperty>(),
            Ok(SystemProperty::PortfolioDate)
        );
        assert!("Nonsense".parse::<SystemProperty>().is_err());
    }

    #[test]
    fn test_formula() {
        assert_eq!(
            SubscriptionKey::position(5, "Price").formula(),
            "=GETPOSITIONVALUE(5,\"Price\")"
        );
        assert_eq!(
            SubscriptionKey::portfolio(12, "Say \"hi\"").formula(),
            "=GETPORTFOLIOVALUE(12,\"Say \"\"hi\"\"\")"
        );
        assert_eq!(
            SubscriptionKey::system(SystemProperty::PortfolioDate).formula(),
            "=GETPORTFOLIODATE()"
        );
    }

    #[test]
    fn test_key_serde() {
        let key = SubscriptionKey::portfolio(3, "Result");
        let json = serde_json::to_string(&key).unwrap();
        assert!(json.contains("\"kind\":\"portfolio\""));
        let parsed: SubscriptionKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }
}
