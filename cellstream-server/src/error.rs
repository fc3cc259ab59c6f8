//! Server start-up and runtime errors.

use cellstream_core::error::ConfigError;
use cellstream_telemetry::logging::LoggingError;
use thiserror::Error;

/// Errors raised while bringing the server host up or running it.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Logging could not be initialized.
    #[error("Initialization error: {0}")]
    Logging(#[from] LoggingError),

    /// The listener could not be bound.
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        /// Address that was requested
        address: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The HTTP server failed while running.
    #[error("Runtime error: {0}")]
    Runtime(String),
}
