//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Backend capability trait and the four drivers
//! - Driver registry keyed by backend type
//! - Connection lifecycle per logical database
//! - Fan-out of one query to many databases
//! - Row decoding into JSON records

#[macro_use]
pub mod macros;
pub mod driver;
pub mod fanout;
pub mod mysql;
#[cfg(feature = "mssql")]
pub mod odbc;
pub mod pool;
pub mod postgres;
pub mod registry;
pub mod round_robin;
pub mod sqlite;
pub mod sqlserver;
pub mod types;

pub use driver::{BackendDriver, DbPool, Driver};
pub use fanout::run_on_many;
pub use pool::{ConnectionManager, LiveConnection};
pub use registry::Registry;
pub use sqlserver::{NativeClient, NativeConnection};
