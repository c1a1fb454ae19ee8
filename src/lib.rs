//! Multi-database MCP gateway library.
//!
//! Exposes PostgreSQL, MySQL/MariaDB, SQL Server and SQLite databases to MCP
//! clients by logical name, as configured in a JSON document nested by
//! database type.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::DbError;
pub use mcp::GatewayService;
