//! Transport-agnostic session seam.
//!
//! The client never talks to a socket directly. A [`Connector`] opens a
//! [`ServerSession`] for an [`Endpoint`] and hands back the stream of
//! callbacks pushed on it; tests substitute in-memory implementations.

use async_trait::async_trait;
use cellstream_core::error::NetworkError;
use cellstream_core::protocol::{Call, Callback, Reply};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use crate::error::ClientError;
use crate::state::ConnectionState;

/// Address of a distribution server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Parses a `ws://` or `wss://` address.
    pub fn parse(address: &str) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidEndpoint {
            address: address.to_string(),
            reason,
        };

        let url = Url::parse(address).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(Self { url })
    }

    /// Returns the full URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Short label of the server, `host:port`.
    #[must_use]
    pub fn connection_id(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl std::str::FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// An established bidirectional session with the server.
#[async_trait]
pub trait ServerSession: Send + Sync {
    /// Makes one remote call and waits for its outcome.
    async fn call(&self, call: Call) -> Result<Reply, ClientError>;

    /// Returns the transport state: `Opened`, `Faulted` or `Closed`.
    fn state(&self) -> ConnectionState;

    /// Closes the transport gracefully.
    async fn close(&self) -> Result<(), NetworkError>;

    /// Drops the transport immediately. Never fails.
    fn abort(&self);
}

/// A session plus the callbacks pushed on it, in arrival order.
pub struct Established {
    /// The session
    pub session: Arc<dyn ServerSession>,
    /// Callbacks pushed by the server; ends when the transport ends
    pub callbacks: mpsc::Receiver<Callback>,
}

impl fmt::Debug for Established {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Established")
            .field("state", &self.session.state())
            .finish_non_exhaustive()
    }
}

/// Opens sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new session to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Established, NetworkError>;
}
