//! # Cellstream Core
//!
//! Shared vocabulary for the cellstream value distribution system.
//!
//! This crate provides:
//! - [`SubscriptionKey`], the identity of a subscribable datum
//!   (position field, portfolio field or system property)
//! - Value and market types pushed to or queried by clients
//! - The wire protocol spoken between clients and the distribution server
//! - Error types separating transport faults from domain faults
//! - Configuration loading with YAML/TOML/JSON support

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

/// Subscription keys
pub mod key;

/// Value, status and market data types
pub mod types;

/// Client/server wire protocol
pub mod protocol;

/// Error types and handling
pub mod error;

/// Configuration management
pub mod config;

pub use key::{KeyCategory, SubscriptionKey, SystemProperty};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{CellstreamError, ConfigError, NetworkError, QueryError};
    pub use crate::key::{KeyCategory, SubscriptionKey, SystemProperty};
    pub use crate::protocol::{Call, Callback, ClientFrame, RemoteFault, Reply, ServerFrame};
    pub use crate::types::*;
}
