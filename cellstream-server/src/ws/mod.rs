//! WebSocket transport.
//!
//! Each socket carries JSON [`ClientFrame`](cellstream_core::protocol::ClientFrame)
//! requests from the client and [`ServerFrame`](cellstream_core::protocol::ServerFrame)
//! responses and callbacks back. A socket maps onto one
//! [`ServerConnection`](crate::connection::ServerConnection); closing the
//! socket is a transport close for its session.

pub mod handler;

pub use handler::ws_handler;
