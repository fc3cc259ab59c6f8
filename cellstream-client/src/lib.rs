//! # Cellstream Client
//!
//! Client side of the cellstream value distribution system.
//!
//! This crate provides:
//! - [`SubscriptionRegistry`], the desired set of subscriptions, kept across
//!   reconnects and replayed on every new session
//! - [`DataServiceClient`], the connection lifecycle and query surface
//! - [`PushChannel`], turning pushed callbacks into [`ClientEvent`]s
//! - The [`Connector`] / [`ServerSession`] seam and its WebSocket
//!   implementation, [`WsConnector`]
//! - [`ConnectionMonitor`], an opt-in reconnection policy
//!
//! # Example
//!
//! ```rust,ignore
//! use cellstream_client::prelude::*;
//!
//! let client = DataServiceClient::websocket(ClientConfig::default());
//! client.subscribe(SubscriptionKey::system(SystemProperty::PortfolioDate)).await;
//! client.open("ws://127.0.0.1:8765/cellstream".parse()?).await?;
//!
//! match client.get_positions(7, PositionFilter::OpenOnly).await {
//!     Ok(ids) => println!("{ids:?}"),
//!     Err(e) => println!("{}", e.user_message()),
//! }
//! ```

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::used_underscore_binding)]

pub mod client;
pub mod config;
pub mod error;
pub mod monitor;
pub mod push;
pub mod registry;
pub mod session;
pub mod state;
pub mod ws;

#[cfg(test)]
mod testing;

pub use client::DataServiceClient;
pub use config::{ClientConfig, MonitorConfig};
pub use error::ClientError;
pub use monitor::ConnectionMonitor;
pub use push::{ClientEvent, PushChannel};
pub use registry::{Replay, SubscriptionRegistry, Teardown};
pub use session::{Connector, Endpoint, Established, ServerSession};
pub use state::ConnectionState;
pub use ws::{WsConnector, WsSession};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ClientConfig, ClientError, ClientEvent, ConnectionMonitor, ConnectionState,
        DataServiceClient, Endpoint,
    };
    pub use cellstream_core::prelude::*;
}
