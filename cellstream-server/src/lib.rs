//! # Cellstream Server
//!
//! Tracks which live values each connected client wants and pushes every
//! new value to exactly the clients subscribed to it.
//!
//! This crate provides:
//! - [`DataServer`], owning sessions, the subscription index and fan-out
//! - The [`ValueProvider`] seam to the computation source, and the
//!   [`DemoProvider`] implementation
//! - A WebSocket transport on axum
//! - [`ServerHost`], wiring telemetry, transport and shutdown into a process
//!
//! # Architecture
//!
//! ```text
//!  client sockets ──► ServerConnection ──► DataServer ◄── ValueProvider
//!                                           │  (sessions + index,
//!                                           │   one lock)
//!                                           ▼
//!                         CallbackSink per session ──► client sockets
//! ```

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::used_underscore_binding)]

pub mod config;
pub mod connection;
pub mod demo;
pub mod error;
pub mod host;
pub mod index;
pub mod provider;
pub mod routes;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod ws;

pub use config::ServerConfig;
pub use connection::ServerConnection;
pub use demo::DemoProvider;
pub use error::ServerError;
pub use host::ServerHost;
pub use provider::ValueProvider;
pub use server::{DataServer, DisconnectReason, ServerEvent, ServerStats};
pub use session::{CallbackSink, ChannelSink, PushError, SessionId};
pub use shutdown::ShutdownController;
