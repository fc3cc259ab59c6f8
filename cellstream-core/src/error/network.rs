//! Transport fault types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport fault: the channel is broken, timed out or unreachable.
///
/// # Examples
///
/// ```
/// use cellstream_core::error::NetworkError;
///
/// let error = NetworkError::ConnectionFailed {
///     reason: "Connection refused".to_string(),
/// };
/// assert!(error.to_string().contains("Connection refused"));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkError {
    /// Connection to the remote endpoint failed.
    #[error("[Network] Connection failed: {reason}")]
    ConnectionFailed {
        /// Reason for the connection failure.
        reason: String,
    },

    /// An operation timed out.
    #[error("[Network] Timeout after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The connection was closed while an operation was pending.
    #[error("[Network] Connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for the closure.
        reason: String,
    },

    /// WebSocket level error.
    #[error("[Network] WebSocket error: {reason}")]
    WebSocket {
        /// Reason for the WebSocket error.
        reason: String,
    },

    /// A frame could not be encoded or decoded.
    #[error("[Network] Protocol error: {reason}")]
    Protocol {
        /// What was wrong with the frame.
        reason: String,
    },
}

impl NetworkError {
    /// Returns true if opening a new session may succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Protocol { .. })
    }

    /// Creates a connection closed error.
    #[must_use]
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }
}
