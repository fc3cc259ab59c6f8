//! Service status and query filters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Readiness of the distribution source.
///
/// `NotConnected` is never sent by a server; clients report it locally when
/// they have no session at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// No session to a server exists.
    #[default]
    NotConnected,
    /// Connected, but the source cannot serve data yet (still loading or stopped).
    NotReady,
    /// The source is serving data.
    Ready,
    /// The source is serving data with reduced quality.
    Degraded,
}

impl ServiceStatus {
    /// Returns true if values can currently be served.
    #[must_use]
    pub const fn is_serving(&self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Not connected"),
            Self::NotReady => write!(f, "Not ready"),
            Self::Ready => write!(f, "Ready"),
            Self::Degraded => write!(f, "Degraded"),
        }
    }
}

/// Which positions of a portfolio a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionFilter {
    /// Every position, open or closed.
    All,
    /// Only positions with a non-zero quantity.
    #[default]
    OpenOnly,
}
