//! Server host.
//!
//! Owns the process-wide pieces: telemetry, the [`DataServer`], the demo
//! provider, the HTTP/WebSocket listener and shutdown.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use cellstream_telemetry::logging::init_logging;
use cellstream_telemetry::metrics::init_metrics;

use crate::config::ServerConfig;
use crate::demo::DemoProvider;
use crate::error::ServerError;
use crate::routes::{AppState, create_router};
use crate::server::DataServer;
use crate::shutdown::{ShutdownController, setup_signal_handlers};

/// Hosts a [`DataServer`] backed by the [`DemoProvider`].
pub struct ServerHost {
    config: ServerConfig,
    server: Arc<DataServer>,
    provider: Arc<DemoProvider>,
    shutdown: ShutdownController,
    _log_guards: Vec<WorkerGuard>,
}

impl ServerHost {
    /// Creates a host. Nothing is bound or started yet.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let provider = Arc::new(DemoProvider::new(config.provider.clone()));
        let server = Arc::new(DataServer::new(
            provider.clone(),
            config.distribution.clone(),
        ));
        Self {
            config,
            server,
            provider,
            shutdown: ShutdownController::new(),
            _log_guards: Vec::new(),
        }
    }

    /// Loads and validates a configuration file.
    pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServerConfig, ServerError> {
        Ok(ServerConfig::load(path)?)
    }

    /// Returns the distribution server.
    #[must_use]
    pub fn server(&self) -> &Arc<DataServer> {
        &self.server
    }

    /// Returns the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Initializes logging and metrics.
    ///
    /// A metrics failure is logged and otherwise ignored.
    pub fn init_telemetry(&mut self) -> Result<(), ServerError> {
        self._log_guards = init_logging(&self.config.logging)?;
        info!(level = %self.config.logging.level, "Logging initialized");

        match init_metrics(&self.config.metrics) {
            Ok(()) => info!("Metrics initialized"),
            Err(e) => warn!(error = %e, "Metrics initialization failed"),
        }
        Ok(())
    }

    /// Binds the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.config.server.bind_address();
        TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind { address, source })
    }

    /// Binds, installs signal handlers and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        tokio::spawn(setup_signal_handlers(self.shutdown.clone()));
        self.serve(listener).await
    }

    /// Serves on `listener` until shutdown is initiated.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        let state = Arc::new(AppState {
            server: Arc::clone(&self.server),
            session: self.config.session.clone(),
        });
        let app = create_router(state, &self.config.server.path);

        self.server.start();
        let ticker = tokio::spawn(
            Arc::clone(&self.provider).run(Arc::clone(&self.server), self.shutdown.subscribe()),
        );

        info!(
            address = ?local,
            path = %self.config.server.path,
            "Cellstream server listening"
        );

        let shutdown = self.shutdown.clone();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()));

        // Stops the ticker if serving failed before shutdown was requested.
        self.shutdown.initiate_shutdown();
        self.server.stop();
        if tokio::time::timeout(self.config.shutdown.timeout(), ticker)
            .await
            .is_err()
        {
            warn!("Demo ticker did not stop in time");
        }

        self.shutdown.mark_complete();
        info!("Cellstream server stopped");
        result
    }

    /// Requests shutdown.
    pub fn shutdown(&self) {
        self.shutdown.initiate_shutdown();
    }
}
