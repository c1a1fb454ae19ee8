//! Multi-database MCP gateway - main entry point.

use clap::Parser;
use multidb_mcp_server::config::{Config, ConfigSource};
use multidb_mcp_server::db::ConnectionManager;
use multidb_mcp_server::transport::{StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber. Output goes to stderr; stdout carries the protocol.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    info!(
        config = %config.config_path.display(),
        "Starting multidb MCP server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let connection_manager = Arc::new(ConnectionManager::new(ConfigSource::file(
        config.config_path.clone(),
    )));

    if config.no_preconnect {
        info!("Preconnect disabled; databases connect on first use");
    } else {
        // A broken configuration is reported per tool call, not fatal at startup
        if let Err(e) = connection_manager.preconnect_all().await {
            warn!(error = %e, "Could not load configuration for preconnect");
        }
    }

    let transport = StdioTransport::new(connection_manager);
    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
