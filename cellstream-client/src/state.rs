//! Connection state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a client connection or of a single session.
///
/// A client moves `Closed -> Opening -> Opened -> Closing -> Closed`. A
/// session whose transport breaks reports `Faulted` until it is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No session.
    #[default]
    Closed,
    /// A session is being established and replayed.
    Opening,
    /// The session is registered and usable.
    Opened,
    /// The session is being torn down.
    Closing,
    /// The transport broke.
    Faulted,
}

impl ConnectionState {
    /// Returns true if calls can be made.
    #[must_use]
    pub const fn is_opened(&self) -> bool {
        matches!(self, Self::Opened)
    }

    /// Returns true if a new session should be opened to recover.
    #[must_use]
    pub const fn needs_reconnect(&self) -> bool {
        matches!(self, Self::Closed | Self::Faulted)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Opening => write!(f, "Opening"),
            Self::Opened => write!(f, "Opened"),
            Self::Closing => write!(f, "Closing"),
            Self::Faulted => write!(f, "Faulted"),
        }
    }
}
