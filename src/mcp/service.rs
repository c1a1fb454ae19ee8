//! MCP service implementation using rmcp.
//!
//! This module defines the GatewayService struct with all database tools
//! exposed via the MCP protocol using the rmcp framework's macros.
//! Every tool answers with one pretty-printed JSON text item; failures are
//! reported as tool errors reading `Error: <message>`.

use crate::db::ConnectionManager;
use crate::error::{DbError, DbResult};
use crate::tools::databases::DatabasesToolHandler;
use crate::tools::query::{MultiQueryInput, QueryInput, QueryToolHandler};
use crate::tools::schema::{DescribeTableInput, ListSchemasInput, ListTablesInput, SchemaToolHandler};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct GatewayService {
    /// Shared connection manager for all database operations
    connection_manager: Arc<ConnectionManager>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl GatewayService {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self {
            connection_manager,
            tool_router: Self::tool_router(),
        }
    }
}

/// Render a handler outcome as a tool result.
fn respond<T: Serialize>(tool: &str, outcome: DbResult<T>) -> Result<CallToolResult, McpError> {
    match outcome {
        Ok(value) => {
            let text = serde_json::to_string_pretty(&value)
                .map_err(|e| DbError::internal(format!("Failed to encode result: {e}")))?;
            Ok(CallToolResult::success(vec![Content::text(text)]))
        }
        Err(e) => {
            warn!(tool, error = %e, "Tool call failed");
            Ok(CallToolResult::error(vec![Content::text(format!("Error: {e}"))]))
        }
    }
}

#[tool_router]
impl GatewayService {
    #[tool(
        description = "List all configured databases with their type, connection status and target database or file.\nCall this first: the `name` of each entry is the `database_name` used by every other tool."
    )]
    async fn list_databases(&self) -> Result<CallToolResult, McpError> {
        let handler = DatabasesToolHandler::new(self.connection_manager.clone());
        respond("list_databases", handler.list_databases().await)
    }

    #[tool(
        description = "Execute a SQL statement on one database and return the rows as a JSON array of objects.\nThe statement is sent as-is; statements that return no rows yield an empty array."
    )]
    async fn query_database(
        &self,
        Parameters(input): Parameters<QueryInput>,
    ) -> Result<CallToolResult, McpError> {
        let handler = QueryToolHandler::new(self.connection_manager.clone());
        respond("query_database", handler.query(input).await)
    }

    #[tool(
        description = "List tables and views in a database.\nDefault schema: public (PostgreSQL), dbo (SQL Server), main (SQLite), current database (MySQL)."
    )]
    async fn list_tables(
        &self,
        Parameters(input): Parameters<ListTablesInput>,
    ) -> Result<CallToolResult, McpError> {
        let handler = SchemaToolHandler::new(self.connection_manager.clone());
        respond("list_tables", handler.list_tables(input).await)
    }

    #[tool(
        description = "Describe the columns of a table: name, type, nullability, default value and maximum length.\nAn unknown table yields an empty column list."
    )]
    async fn describe_table(
        &self,
        Parameters(input): Parameters<DescribeTableInput>,
    ) -> Result<CallToolResult, McpError> {
        let handler = SchemaToolHandler::new(self.connection_manager.clone());
        respond("describe_table", handler.describe_table(input).await)
    }

    #[tool(
        description = "List schemas in a database. PostgreSQL system schemas are omitted.\nFor MySQL this lists databases; SQLite always reports main."
    )]
    async fn list_schemas(
        &self,
        Parameters(input): Parameters<ListSchemasInput>,
    ) -> Result<CallToolResult, McpError> {
        let handler = SchemaToolHandler::new(self.connection_manager.clone());
        respond("list_schemas", handler.list_schemas(input).await)
    }

    #[tool(
        description = "Execute the same SQL statement on several databases concurrently.\nReturns an object keyed by database name; each value is the row array or {\"error\": message} for that database alone."
    )]
    async fn query_multiple_databases(
        &self,
        Parameters(input): Parameters<MultiQueryInput>,
    ) -> Result<CallToolResult, McpError> {
        let handler = QueryToolHandler::new(self.connection_manager.clone());
        respond("query_multiple_databases", handler.query_many(input).await)
    }
}

#[tool_handler]
impl ServerHandler for GatewayService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "multidb-mcp-server".to_owned(),
                title: Some("Multi-Database MCP Gateway".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Gateway to PostgreSQL, MySQL/MariaDB, SQL Server and SQLite databases.\n\
                \n\
                ## Workflow\n\
                1. Call `list_databases` to get the configured database names\n\
                2. Pass a name as `database_name` to `list_tables`, `describe_table`, `list_schemas` or `query_database`\n\
                3. Use `query_multiple_databases` with `database_names` to run one statement on several databases\n\
                \n\
                ## Notes\n\
                - Connections open on first use and are reused afterwards.\n\
                - Write the SQL in the dialect of the target database.\n\
                - In `query_multiple_databases` a failing database does not affect the others."
                    .to_string(),
            ),
        }
    }
}
