//! Prometheus metrics.
//!
//! Metric macros are no-ops until [`init_metrics`] installs a recorder, so
//! libraries record unconditionally and binaries decide whether to export.

mod config;
mod recorder;

pub use config::MetricsConfig;
pub use recorder::DistributionMetrics;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder described by `config`.
///
/// Does nothing when `config.enabled` is false.
///
/// # Example
///
/// ```no_run
/// use cellstream_telemetry::metrics::{init_metrics, MetricsConfig};
///
/// init_metrics(&MetricsConfig::default()).expect("Failed to initialize metrics");
/// ```
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new();
    if config.expose_endpoint {
        let addr: SocketAddr = config
            .endpoint_address
            .parse()
            .map_err(|e| MetricsError::InvalidAddress(format!("{e}")))?;
        // The listener task is spawned on the ambient tokio runtime.
        builder
            .with_http_listener(addr)
            .install()
            .map_err(|e| MetricsError::InitializationFailed(format!("{e}")))?;
    } else {
        let handle = builder
            .install_recorder()
            .map_err(|e| MetricsError::InitializationFailed(format!("{e}")))?;
        METRICS_HANDLE
            .set(handle)
            .map_err(|_| MetricsError::AlreadyInitialized)?;
    }

    DistributionMetrics::register();

    Ok(())
}

/// Renders the current metrics in Prometheus text format.
///
/// Returns an empty string if no recorder was installed, or if the recorder
/// serves its own HTTP endpoint.
#[must_use]
pub fn render_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Errors that can occur during metrics initialization.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Metrics already initialized
    #[error("Metrics system already initialized")]
    AlreadyInitialized,

    /// Invalid endpoint address
    #[error("Invalid endpoint address: {0}")]
    InvalidAddress(String),

    /// Initialization failed
    #[error("Metrics initialization failed: {0}")]
    InitializationFailed(String),
}
