//! Data models for the multi-database gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{
    BackendType, ConnectionConfig, ConnectionParams, ConnectionStatus, LinkState,
};
pub use query::{FanOutOutcome, FanOutResults, Row};
pub use schema::{ColumnDescriptor, TableEntry, table_kind};
