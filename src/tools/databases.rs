//! Database discovery tool.
//!
//! This module implements the `list_databases` MCP tool.

use crate::db::ConnectionManager;
use crate::error::DbResult;
use crate::models::{ConnectionStatus, LinkState};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Input for the list_databases tool (no parameters).
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListDatabasesInput {}

/// Output from the list_databases tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListDatabasesOutput {
    /// Every configured database, connected or not
    pub databases: Vec<ConnectionStatus>,
    /// Number of configured databases
    pub count: usize,
    /// Number of databases with a live connection
    pub connected: usize,
}

pub struct DatabasesToolHandler {
    connection_manager: Arc<ConnectionManager>,
}

impl DatabasesToolHandler {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }

    pub async fn list_databases(&self) -> DbResult<ListDatabasesOutput> {
        let databases = self.connection_manager.list_status().await?;
        let connected = databases
            .iter()
            .filter(|db| db.status == LinkState::Connected)
            .count();

        info!(count = databases.len(), connected, "Listed databases");
        Ok(ListDatabasesOutput {
            count: databases.len(),
            connected,
            databases,
        })
    }
}
