//! Client error types.

use cellstream_core::error::{NetworkError, QueryError};
use cellstream_core::protocol::RemoteFault;
use thiserror::Error;

/// Error returned by client operations.
///
/// Domain faults arrive as [`ClientError::Query`] and leave the session
/// open. Transport faults arrive as [`ClientError::Network`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// No session is open.
    #[error("Not connected")]
    NotConnected,

    /// The query failed with an expected domain fault.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The transport failed.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The server rejected the call for a reason other than a domain fault.
    #[error("[Remote] {0}")]
    Remote(String),

    /// The endpoint address is not usable.
    #[error("Invalid endpoint '{address}': {reason}")]
    InvalidEndpoint {
        /// Address as given
        address: String,
        /// What is wrong with it
        reason: String,
    },
}

impl ClientError {
    /// Returns true if the session broke or was never open.
    #[must_use]
    pub const fn is_connection_problem(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Network(_))
    }

    /// Text shown in a cell in place of a value.
    ///
    /// Not-connected and not-found conditions read differently so users can
    /// tell a missing server from a bad reference.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotConnected | Self::Network(_) => "Not connected".to_string(),
            Self::Query(fault) => fault.to_string(),
            Self::Remote(reason) => format!("Server error: {reason}"),
            Self::InvalidEndpoint { address, .. } => format!("Invalid address {address}"),
        }
    }
}

impl From<RemoteFault> for ClientError {
    fn from(fault: RemoteFault) -> Self {
        match fault {
            RemoteFault::Query(query) => Self::Query(query),
            RemoteFault::NotRegistered => Self::Remote("session not registered".to_string()),
            RemoteFault::Internal(reason) => Self::Remote(reason),
        }
    }
}
