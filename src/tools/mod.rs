//! MCP tool implementations.
//!
//! This module contains all database tool handlers:
//! - `list_databases`: Configured databases and their connection status
//! - `query_database`: Execute a statement on one database
//! - `query_multiple_databases`: Execute a statement on several databases at once
//! - `list_tables`: List tables and views in a schema
//! - `describe_table`: Get column information for a table
//! - `list_schemas`: List schemas in a database

pub mod databases;
pub mod query;
pub mod schema;

pub use databases::{DatabasesToolHandler, ListDatabasesInput, ListDatabasesOutput};
pub use query::{MultiQueryInput, QueryInput, QueryToolHandler};
pub use schema::{
    DescribeTableInput, DescribeTableOutput, ListSchemasInput, ListSchemasOutput, ListTablesInput,
    ListTablesOutput, SchemaToolHandler,
};
