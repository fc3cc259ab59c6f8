//! Error types.
//!
//! Errors are split by how the caller is expected to react:
//! - [`NetworkError`] - transport faults. They break the session and are
//!   never translated into domain errors.
//! - [`QueryError`] - domain faults returned by query operations. They are
//!   expected, carried over the wire and never tear the session down.
//! - [`ConfigError`] - configuration loading and validation.
//!
//! [`CellstreamError`] wraps all of them for code that does not care.
//!
//! ```
//! use cellstream_core::error::{CellstreamError, QueryError};
//!
//! let error = CellstreamError::from(QueryError::PortfolioNotLoaded { portfolio_id: 7 });
//! assert!(error.is_domain());
//! assert_eq!(error.to_string(), "Portfolio 7 is not loaded");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod config;
mod network;
mod query;

pub use config::ConfigError;
pub use network::NetworkError;
pub use query::QueryError;

/// Top-level error type.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellstreamError {
    /// Transport fault.
    #[error("{0}")]
    Network(#[from] NetworkError),

    /// Domain fault from a query.
    #[error("{0}")]
    Query(#[from] QueryError),

    /// Configuration error.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl CellstreamError {
    /// Returns true if this error broke (or came from) the transport.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns true if this is an expected domain fault.
    #[must_use]
    pub const fn is_domain(&self) -> bool {
        matches!(self, Self::Query(_))
    }

    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_recoverable(),
            Self::Query(_) => true,
            Self::Config(_) => false,
        }
    }
}

/// Result type alias using [`CellstreamError`].
pub type Result<T> = std::result::Result<T, CellstreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let transport = CellstreamError::from(NetworkError::Timeout { timeout_ms: 100 });
        assert!(transport.is_transport());
        assert!(!transport.is_domain());
        assert!(transport.is_recoverable());

        let domain = CellstreamError::from(QueryError::PortfolioNotFound { portfolio_id: 1 });
        assert!(domain.is_domain());
        assert!(!domain.is_transport());

        let config = CellstreamError::from(ConfigError::missing_field("port"));
        assert!(!config.is_recoverable());
    }

    #[test]
    fn test_display_passthrough() {
        let error = CellstreamError::from(NetworkError::ConnectionClosed {
            reason: "reset".to_string(),
        });
        assert_eq!(error.to_string(), "[Network] Connection closed: reset");
    }
}
