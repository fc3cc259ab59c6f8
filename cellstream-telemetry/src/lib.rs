//! # Cellstream Telemetry
//!
//! Logging and metrics for the cellstream distribution server and clients.
//!
//! - Structured logging built on `tracing`, JSON or pretty, to stdout or
//!   rolling files
//! - Prometheus metrics for sessions, subscriptions and fan-out

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

/// Logging configuration and initialization
pub mod logging;

/// Metrics collection and export
pub mod metrics;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::logging::{LogConfig, LogFormat, LogOutput, init_logging};
    pub use crate::metrics::{DistributionMetrics, MetricsConfig, init_metrics};
}
