//! WebSocket transport.
//!
//! [`WsConnector`] speaks the JSON frame protocol from
//! [`cellstream_core::protocol`] over `tokio-tungstenite`. Each call is sent
//! as a numbered request; responses are matched by id, and callbacks are
//! forwarded in arrival order.

mod connector;

pub use connector::{WsConnector, WsSession};
