//! Query execution tools.
//!
//! This module implements the `query_database` and `query_multiple_databases`
//! MCP tools. Statements are passed to the backend unchanged.

use crate::db::{ConnectionManager, run_on_many};
use crate::error::{DbError, DbResult};
use crate::models::{FanOutResults, Row};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Input for the query_database tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryInput {
    /// Logical database name from list_databases
    pub database_name: String,
    /// SQL statement to execute
    pub query: String,
}

/// Input for the query_multiple_databases tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MultiQueryInput {
    /// Logical database names from list_databases
    pub database_names: Vec<String>,
    /// SQL statement to execute on every database
    pub query: String,
}

pub struct QueryToolHandler {
    connection_manager: Arc<ConnectionManager>,
}

impl QueryToolHandler {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }

    pub async fn query(&self, input: QueryInput) -> DbResult<Vec<Row>> {
        if input.query.trim().is_empty() {
            return Err(DbError::invalid_input("Query cannot be empty"));
        }

        let conn = self.connection_manager.ensure(&input.database_name).await?;
        let start = std::time::Instant::now();
        let rows = conn.driver.run_query(&conn.pool, &input.query).await?;

        info!(
            database = %input.database_name,
            rows = rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query executed"
        );
        Ok(rows)
    }

    pub async fn query_many(&self, input: MultiQueryInput) -> DbResult<FanOutResults> {
        if input.query.trim().is_empty() {
            return Err(DbError::invalid_input("Query cannot be empty"));
        }

        let results = run_on_many(&self.connection_manager, &input.database_names, &input.query).await;
        let failed = results.values().filter(|o| o.is_error()).count();

        info!(
            targets = results.len(),
            failed,
            "Fan-out query finished"
        );
        Ok(results)
    }
}
