//! Metrics configuration types.

use serde::{Deserialize, Serialize};

/// Configuration for the metrics system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether a Prometheus recorder is installed at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether to serve the Prometheus scrape endpoint over HTTP
    #[serde(default)]
    pub expose_endpoint: bool,

    /// Address of the scrape endpoint (e.g. "0.0.0.0:9090")
    #[serde(default = "default_endpoint_address")]
    pub endpoint_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expose_endpoint: false,
            endpoint_address: default_endpoint_address(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_endpoint_address() -> String {
    "0.0.0.0:9090".to_string()
}
