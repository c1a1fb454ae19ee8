//! Error types for the multi-database gateway.
//!
//! Every failure the gateway can report is a [`DbError`]. Operation handlers
//! never let one escape as a protocol fault: the MCP service renders it as an
//! `Error: <message>` tool result instead.

use crate::models::BackendType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(
        "Database '{name}' not found in configuration. Available databases: [{}]",
        .available.join(", ")
    )]
    NotFound {
        name: String,
        available: Vec<String>,
    },

    /// Message already names the target, so it is shown as is.
    #[error("{message}")]
    Connection { message: String, suggestion: String },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error(
        "Unsupported database type: {token}. Supported types: {}",
        BackendType::CANONICAL.join(", ")
    )]
    UnsupportedBackend { token: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// `available` is rendered in the order given; callers pass sorted names.
    pub fn not_found<I, S>(name: impl Into<String>, available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let available = available.into_iter().map(Into::into).collect();
        Self::NotFound {
            name: name.into(),
            available,
        }
    }

    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        let (message, suggestion) = (message.into(), suggestion.into());
        Self::Connection { message, suggestion }
    }

    pub fn query(message: impl Into<String>, sql_state: Option<String>) -> Self {
        let message = message.into();
        Self::Query { message, sql_state }
    }

    pub fn unsupported_backend(token: impl Into<String>) -> Self {
        let token = token.into();
        Self::UnsupportedBackend { token }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::InvalidInput { message }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Internal { message }
    }

    /// Operator hint attached to connection failures.
    pub fn suggestion(&self) -> Option<&str> {
        if let Self::Connection { suggestion, .. } = self {
            Some(suggestion.as_str())
        } else {
            None
        }
    }
}

/// Errors raised by the server while running a statement are query errors
/// carrying the SQLSTATE; failures to reach or talk to the server are
/// connection errors with a hint for the operator.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let (message, hint) = match err {
            sqlx::Error::Database(db_err) => {
                let state = db_err.code().map(|c| c.into_owned());
                return DbError::query(db_err.message(), state);
            }
            sqlx::Error::ColumnDecode { index, source } => {
                return DbError::query(format!("Cannot decode column {index}: {source}"), None);
            }
            sqlx::Error::WorkerCrashed => return DbError::internal("SQLite worker thread crashed"),
            sqlx::Error::Configuration(e) => (
                format!("Invalid connection settings: {e}"),
                "Review this database's entry in the configuration file",
            ),
            sqlx::Error::PoolTimedOut => (
                "No pooled connection became available in time".to_string(),
                "Make sure the server is up and accepting connections",
            ),
            sqlx::Error::PoolClosed => (
                "The connection pool has been shut down".to_string(),
                "Run the tool again to open a fresh pool",
            ),
            sqlx::Error::Io(e) => (
                format!("Network I/O failed: {e}"),
                "Verify host, port and that the server is running",
            ),
            sqlx::Error::Tls(e) => (
                format!("TLS handshake failed: {e}"),
                "Verify the server certificate and TLS settings",
            ),
            sqlx::Error::Protocol(e) => (
                format!("Unexpected reply from server: {e}"),
                "Confirm the configured type matches the server",
            ),
            other => return DbError::query(other.to_string(), None),
        };
        DbError::connection(message, hint)
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Protocol-level mapping, used when a failure cannot be reported as a tool result.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        match &err {
            DbError::InvalidInput { .. } | DbError::Query { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), None)
            }
            DbError::NotFound { .. } => rmcp::ErrorData::resource_not_found(err.to_string(), None),
            DbError::Connection { suggestion, .. } => {
                let data = serde_json::json!({ "suggestion": suggestion });
                rmcp::ErrorData::internal_error(err.to_string(), Some(data))
            }
            DbError::Config { .. } | DbError::UnsupportedBackend { .. } | DbError::Internal { .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), None)
            }
        }
    }
}
