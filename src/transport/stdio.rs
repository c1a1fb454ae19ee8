//! Stdio transport for the MCP server.
//!
//! JSON-RPC messages are read from stdin and responses written to stdout, so
//! all logging goes to stderr.

use crate::db::ConnectionManager;
use crate::error::{DbError, DbResult};
use crate::mcp::GatewayService;
use crate::transport::Transport;
use rmcp::{ServiceExt, transport::stdio};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

pub struct StdioTransport {
    connection_manager: Arc<ConnectionManager>,
}

impl StdioTransport {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> DbResult<()> {
        info!("Starting MCP server with stdio transport");

        let service = GatewayService::new(self.connection_manager.clone());
        let running_service = service
            .serve(stdio())
            .await
            .map_err(|e| DbError::internal(format!("Failed to start stdio transport: {}", e)))?;

        let outcome = tokio::select! {
            result = running_service.waiting() => match result {
                Ok(reason) => {
                    info!(reason = ?reason, "Client disconnected");
                    Ok(false)
                }
                Err(e) => Err(DbError::internal(format!("Stdio transport error: {}", e))),
            },
            _ = wait_for_signal() => {
                info!("Shutdown signal received (send again to force exit)");
                Ok(true)
            }
        };

        let shutdown_requested = matches!(outcome, Ok(true));
        if shutdown_requested {
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("Received second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        let connected = self.connection_manager.connected_count().await;
        info!(connected, "Closing all database connections");
        self.connection_manager.cleanup().await;

        if shutdown_requested {
            // stdin reads cannot be interrupted, so leave without draining them
            info!("Exiting process");
            std::process::exit(0);
        }

        outcome.map(|_| ())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

/// Wait for SIGINT or SIGTERM. A handler that cannot be installed never fires.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
