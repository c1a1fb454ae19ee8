//! Schema introspection tools.
//!
//! This module implements the `list_tables`, `describe_table` and
//! `list_schemas` MCP tools. When no schema is given, the backend default is
//! used and reported back.

use crate::db::ConnectionManager;
use crate::error::DbResult;
use crate::models::{ColumnDescriptor, TableEntry};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Input for the list_tables tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListTablesInput {
    /// Logical database name from list_databases
    pub database_name: String,
    /// Schema name. Defaults to public (PostgreSQL), dbo (SQL Server), main (SQLite)
    /// or the current database (MySQL).
    #[serde(default)]
    pub schema: Option<String>,
}

/// Output from the list_tables tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListTablesOutput {
    pub database: String,
    /// Schema that was listed; null means the MySQL current database
    pub schema: Option<String>,
    pub tables: Vec<TableEntry>,
    pub count: usize,
}

/// Input for the describe_table tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DescribeTableInput {
    /// Logical database name from list_databases
    pub database_name: String,
    /// Table name to describe
    pub table_name: String,
    /// Schema name. Defaults as for list_tables.
    #[serde(default)]
    pub schema: Option<String>,
}

/// Output from the describe_table tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DescribeTableOutput {
    pub database: String,
    pub schema: Option<String>,
    pub table: String,
    /// Columns in ordinal order; empty when the table does not exist
    pub columns: Vec<ColumnDescriptor>,
}

/// Input for the list_schemas tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListSchemasInput {
    /// Logical database name from list_databases
    pub database_name: String,
}

/// Output from the list_schemas tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListSchemasOutput {
    pub database: String,
    pub schemas: Vec<String>,
    pub count: usize,
}

pub struct SchemaToolHandler {
    connection_manager: Arc<ConnectionManager>,
}

impl SchemaToolHandler {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }

    pub async fn list_tables(&self, input: ListTablesInput) -> DbResult<ListTablesOutput> {
        let conn = self.connection_manager.ensure(&input.database_name).await?;
        let schema = input
            .schema
            .or_else(|| conn.config.backend_type.default_schema().map(str::to_string));

        let tables = conn.driver.list_tables(&conn.pool, schema.as_deref()).await?;
        let count = tables.len();

        info!(
            database = %input.database_name,
            count = count,
            "Listed tables"
        );

        Ok(ListTablesOutput {
            database: input.database_name,
            schema,
            tables,
            count,
        })
    }

    pub async fn describe_table(&self, input: DescribeTableInput) -> DbResult<DescribeTableOutput> {
        let conn = self.connection_manager.ensure(&input.database_name).await?;
        let schema = input
            .schema
            .or_else(|| conn.config.backend_type.default_schema().map(str::to_string));

        let columns = conn
            .driver
            .describe_table(&conn.pool, &input.table_name, schema.as_deref())
            .await?;

        info!(
            database = %input.database_name,
            table = %input.table_name,
            columns = columns.len(),
            "Described table"
        );

        Ok(DescribeTableOutput {
            database: input.database_name,
            schema,
            table: input.table_name,
            columns,
        })
    }

    pub async fn list_schemas(&self, input: ListSchemasInput) -> DbResult<ListSchemasOutput> {
        let conn = self.connection_manager.ensure(&input.database_name).await?;
        let schemas = conn.driver.list_schemas(&conn.pool).await?;

        Ok(ListSchemasOutput {
            database: input.database_name,
            count: schemas.len(),
            schemas,
        })
    }
}
