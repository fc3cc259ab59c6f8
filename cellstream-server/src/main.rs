//! # Cellstream Server
//!
//! Runs the distribution server with the demo value provider.
//!
//! ```bash
//! # Run with the default configuration
//! cellstream-server
//!
//! # Run with a configuration file
//! cellstream-server --config /path/to/config.yaml
//!
//! # Override from the environment
//! CELLSTREAM_PORT=9000 cellstream-server
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use cellstream_core::config::Configurable;
use cellstream_server::config::ENV_PREFIX;
use cellstream_server::{ServerConfig, ServerHost};

/// Cellstream value distribution server
#[derive(Parser, Debug)]
#[command(name = "cellstream-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "cellstream.yaml")]
    config: PathBuf,

    /// Override listen host
    #[arg(long)]
    host: Option<String>,

    /// Override listen port
    #[arg(long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if args.validate {
        println!("Configuration is valid");
        return;
    }

    let mut host = ServerHost::new(config);
    if let Err(e) = host.init_telemetry() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    match host.run().await {
        Ok(()) => info!("Cellstream server exited"),
        Err(e) => {
            error!(error = %e, "Server error");
            std::process::exit(1);
        }
    }
}

/// Loads the configuration file, or defaults when it does not exist, then
/// applies command-line overrides.
fn load_config(args: &Args) -> Result<ServerConfig, cellstream_server::ServerError> {
    let mut config = if args.config.exists() {
        ServerHost::load_config(&args.config)?
    } else {
        eprintln!(
            "Configuration file not found: {}, using defaults",
            args.config.display()
        );
        let mut config = ServerConfig::default();
        config.apply_env_overrides(ENV_PREFIX)?;
        config
    };

    if let Some(host) = &args.host {
        config.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }
    Ok(config)
}
