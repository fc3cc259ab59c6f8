//! Opt-in reconnection policy.
//!
//! [`DataServiceClient`] never reconnects by itself. An application that
//! wants to stay connected runs a [`ConnectionMonitor`], which checks the
//! client periodically and reopens it with exponential backoff.

use cellstream_telemetry::metrics::DistributionMetrics;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::client::DataServiceClient;
use crate::config::MonitorConfig;
use crate::error::ClientError;
use crate::session::Endpoint;

/// Keeps a client connected to one endpoint.
#[derive(Debug)]
pub struct ConnectionMonitor {
    client: Arc<DataServiceClient>,
    endpoint: Endpoint,
    config: MonitorConfig,
}

impl ConnectionMonitor {
    /// Creates a monitor. Nothing runs until [`run`](Self::run) or
    /// [`spawn`](Self::spawn).
    #[must_use]
    pub const fn new(client: Arc<DataServiceClient>, endpoint: Endpoint, config: MonitorConfig) -> Self {
        Self {
            client,
            endpoint,
            config,
        }
    }

    /// Runs the monitor on a new task until `shutdown` fires.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Checks the client every interval and reopens it while it is closed
    /// or faulted. Returns when `shutdown` fires or its sender is dropped.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut attempt: u32 = 0;

        info!(endpoint = %self.endpoint, "Connection monitor started");
        'monitor: loop {
            tokio::select! {
                _ = shutdown.recv() => break 'monitor,
                _ = ticker.tick() => {
                    let state = self.client.state();
                    if !state.needs_reconnect() {
                        attempt = 0;
                        continue;
                    }

                    debug!(%state, attempt, "Reconnecting");
                    match self.reconnect().await {
                        Ok(()) => {
                            DistributionMetrics::client_reconnect(true);
                            info!(endpoint = %self.endpoint, attempts = attempt + 1, "Reconnected");
                            attempt = 0;
                        }
                        Err(e) => {
                            DistributionMetrics::client_reconnect(false);
                            let delay = self.config.delay_for(attempt);
                            attempt = attempt.saturating_add(1);
                            warn!(
                                endpoint = %self.endpoint,
                                attempt,
                                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                error = %e,
                                "Reconnect failed"
                            );
                            tokio::select! {
                                _ = shutdown.recv() => break 'monitor,
                                () = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }
        info!(endpoint = %self.endpoint, "Connection monitor stopped");
    }

    async fn reconnect(&self) -> Result<(), ClientError> {
        self.client.close().await;
        self.client.open(self.endpoint.clone()).await
    }
}
