//! Connection-related data models.
//!
//! This module defines the backend type tag, the per-connection parameters read
//! from the configuration document, and the status view reported to clients.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Supported backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum BackendType {
    #[serde(rename = "postgresql")]
    PostgreSQL,
    /// Includes MariaDB
    #[serde(rename = "mysql")]
    MySQL,
    #[serde(rename = "sqlserver")]
    SqlServer,
    #[serde(rename = "sqlite")]
    SQLite,
}

impl BackendType {
    /// Canonical tokens, in the order they are reported to users.
    pub const CANONICAL: [&'static str; 4] = ["postgresql", "mysql", "sqlserver", "sqlite"];

    /// Every spelling accepted as a configuration section key.
    pub const KNOWN_ALIASES: [&'static str; 10] = [
        "postgresql",
        "postgres",
        "pg",
        "mysql",
        "mariadb",
        "sqlserver",
        "mssql",
        "sql server",
        "sqlite",
        "sqlite3",
    ];

    /// Resolve a backend alias. Matching ignores case and surrounding whitespace.
    pub fn from_alias(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            "sqlserver" | "mssql" | "sql server" => Some(Self::SqlServer),
            "sqlite" | "sqlite3" => Some(Self::SQLite),
            _ => None,
        }
    }

    /// The canonical token for this backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::MySQL => "mysql",
            Self::SqlServer => "sqlserver",
            Self::SQLite => "sqlite",
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SqlServer => "SQL Server",
            Self::SQLite => "SQLite",
        }
    }

    /// Schema used when an operation does not name one.
    ///
    /// MySQL has no schema layer above the database, so it falls back to the
    /// connection's current database instead.
    pub fn default_schema(&self) -> Option<&'static str> {
        match self {
            Self::PostgreSQL => Some("public"),
            Self::MySQL => None,
            Self::SqlServer => Some("dbo"),
            Self::SQLite => Some("main"),
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SqlServer => Some(1433),
            Self::SQLite => None,
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Connection parameters for one logical database.
///
/// Only the keys the drivers understand are typed; anything else is kept in
/// `extra` so the normalized configuration reproduces the document faithfully.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Accepts a number or a numeric string.
    #[serde(
        default,
        deserialize_with = "port_from_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub port: Option<u16>,
    #[serde(default, alias = "username", skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Database name, or the file path for SQLite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// SQLite file path, used when `database` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// SQL Server: force an encrypted channel.
    #[serde(
        default,
        deserialize_with = "flag_from_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub encrypt: Option<bool>,
    /// SQL Server: accept self-signed server certificates.
    #[serde(
        default,
        deserialize_with = "flag_from_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub trust_server_certificate: Option<bool>,
    /// PostgreSQL/MySQL TLS mode, e.g. "disable", "prefer", "require".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("path", &self.path)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("ssl_mode", &self.ssl_mode)
            .finish_non_exhaustive()
    }
}

/// Interpret the loose truthiness used in hand-written configuration files.
pub fn parse_flag(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::String(s) => Some(matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes"
        )),
        JsonValue::Number(n) => Some(n.as_i64().is_some_and(|v| v != 0)),
        JsonValue::Null => None,
        _ => Some(false),
    }
}

fn flag_from_value<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_flag))
}

fn port_from_value<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Number(n)) => n
            .as_u64()
            .and_then(|v| u16::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid port number: {n}"))),
        Some(JsonValue::String(s)) => s
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid port: '{s}'"))),
        Some(other) => Err(D::Error::custom(format!("invalid port: {other}"))),
    }
}

/// A fully resolved connection entry: logical name, backend and parameters.
///
/// Serializes to the flat shape of the configuration entry with a `type` key
/// holding the canonical backend token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionConfig {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type")]
    pub backend_type: BackendType,
    #[serde(flatten)]
    pub params: ConnectionParams,
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, backend_type: BackendType, params: ConnectionParams) -> Self {
        Self {
            name: name.into(),
            backend_type,
            params,
        }
    }

    /// Database name or file path this connection points at.
    pub fn target(&self) -> &str {
        self.params
            .database
            .as_deref()
            .or(self.params.path.as_deref())
            .unwrap_or("unknown")
    }

    /// Port to use, falling back to the backend default.
    pub fn port(&self) -> Option<u16> {
        self.params.port.or(self.backend_type.default_port())
    }

    /// Human-readable description of the endpoint, used in error messages.
    pub fn describe_target(&self) -> String {
        match self.backend_type {
            BackendType::SQLite => self.sqlite_path().to_string(),
            _ => format!(
                "{}:{}/{}",
                self.params.host.as_deref().unwrap_or("?"),
                self.port().map(|p| p.to_string()).unwrap_or_default(),
                self.params.database.as_deref().unwrap_or("")
            ),
        }
    }

    /// SQLite database file, `:memory:` when nothing is configured.
    pub fn sqlite_path(&self) -> &str {
        self.params
            .database
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.params.path.as_deref())
            .unwrap_or(":memory:")
    }
}

/// Whether a logical database currently holds a live pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Status entry returned by list_databases (no secrets exposed).
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ConnectionStatus {
    /// Logical database name. Use this value in database_name for all tool calls.
    pub name: String,
    #[serde(rename = "type")]
    pub backend_type: BackendType,
    pub status: LinkState,
    /// Database name or file path
    pub target: String,
}
