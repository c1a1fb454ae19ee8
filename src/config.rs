//! Configuration handling for the multi-database gateway.
//!
//! Two layers live here: process settings parsed from CLI arguments and
//! environment variables, and the database document that maps logical names
//! to connection parameters.
//!
//! The database document is nested by backend type:
//!
//! ```json
//! {
//!   "postgresql": { "analytics": { "host": "pg", "user": "u", "password": "p", "database": "a" } },
//!   "sqlite":     { "local":     { "database": "/data/local.db" } }
//! }
//! ```
//!
//! [`normalize`] flattens it into a logical-name keyed map, and
//! [`ConfigSource`] caches the normalized result until the file changes.

use crate::error::{DbError, DbResult};
use crate::models::{BackendType, ConnectionConfig, ConnectionParams};
use clap::Parser;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

pub const DEFAULT_CONFIG_PATH: &str = "/app/databases.json";

// Pool configuration defaults
pub const DEFAULT_POOL_SIZE: u32 = 5;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Normalized configuration: logical name to resolved connection entry.
pub type ConnectionMap = BTreeMap<String, ConnectionConfig>;

/// Process configuration for the gateway.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "multidb-mcp-server",
    about = "MCP gateway for PostgreSQL, MySQL, SQL Server and SQLite databases",
    version,
    author
)]
pub struct Config {
    /// Path to the JSON document describing the databases, nested by type.
    #[arg(
        short = 'c',
        long = "config",
        value_name = "PATH",
        env = "DB_CONFIG_PATH",
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config_path: PathBuf,

    /// Skip connecting to every configured database at startup.
    /// Connections are then opened on first use.
    #[arg(long, env = "MCP_NO_PRECONNECT")]
    pub no_preconnect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,
}

/// Flatten a type-nested configuration document into a logical-name map.
///
/// Fails on the first structural problem: a root or section that is not an
/// object, an unknown backend key, an entry that is not an object, parameters
/// of the wrong type, or the same logical name appearing in two sections.
pub fn normalize(raw: &JsonValue) -> DbResult<ConnectionMap> {
    let root = raw.as_object().ok_or_else(|| {
        DbError::config("Configuration root must be an object keyed by database type.")
    })?;

    let mut connections = ConnectionMap::new();
    let mut sections: HashMap<&str, &str> = HashMap::new();

    for (section, entries) in root {
        let backend = BackendType::from_alias(section).ok_or_else(|| {
            DbError::config(format!(
                "Unknown database type '{}'. Expected one of: {}. Configuration must be nested by database type.",
                section,
                BackendType::KNOWN_ALIASES.join(", ")
            ))
        })?;

        let entries = entries.as_object().ok_or_else(|| {
            DbError::config(format!(
                "Invalid configuration for database type '{}'. Expected a dictionary of database connections.",
                section
            ))
        })?;

        for (name, params) in entries {
            if !params.is_object() {
                return Err(DbError::config(format!(
                    "Invalid configuration for database '{}' under '{}'. Expected a dictionary of connection parameters.",
                    name, section
                )));
            }

            let params: ConnectionParams = serde_json::from_value(params.clone()).map_err(|e| {
                DbError::config(format!("Invalid parameters for database '{}': {}", name, e))
            })?;

            if let Some(previous) = sections.insert(name.as_str(), section.as_str()) {
                return Err(DbError::config(format!(
                    "Duplicate database name '{}' found under '{}' and '{}'. Logical names must be unique across types.",
                    name, previous, section
                )));
            }

            connections.insert(name.clone(), ConnectionConfig::new(name, backend, params));
        }
    }

    Ok(connections)
}

async fn read_document(path: &Path) -> DbResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        DbError::config(format!(
            "Cannot read configuration file '{}': {}",
            path.display(),
            e
        ))
    })
}

fn parse_document(path: &Path, text: &str) -> DbResult<ConnectionMap> {
    let raw: JsonValue = serde_json::from_str(text).map_err(|e| {
        DbError::config(format!(
            "Configuration file '{}' is not valid JSON: {}",
            path.display(),
            e
        ))
    })?;
    normalize(&raw)
}

/// Read and normalize a configuration file.
pub async fn load_file(path: &Path) -> DbResult<ConnectionMap> {
    let text = read_document(path).await?;
    parse_document(path, &text)
}

/// Last parsed document, keyed by its exact text.
#[derive(Debug)]
struct Cached {
    text: String,
    connections: Arc<ConnectionMap>,
}

/// Where the database configuration comes from.
///
/// A file source reads the document on every call but parses it only when
/// the contents differ from the last parse, so every operation sees the
/// current file.
#[derive(Debug)]
pub struct ConfigSource {
    kind: SourceKind,
}

#[derive(Debug)]
enum SourceKind {
    File {
        path: PathBuf,
        cache: Mutex<Option<Cached>>,
    },
    Fixed(Arc<ConnectionMap>),
}

impl ConfigSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: SourceKind::File {
                path: path.into(),
                cache: Mutex::new(None),
            },
        }
    }

    /// A fixed, already normalized configuration.
    pub fn fixed(connections: ConnectionMap) -> Self {
        Self {
            kind: SourceKind::Fixed(Arc::new(connections)),
        }
    }

    /// Return the current normalized configuration.
    pub async fn load(&self) -> DbResult<Arc<ConnectionMap>> {
        let (path, cache) = match &self.kind {
            SourceKind::Fixed(connections) => return Ok(Arc::clone(connections)),
            SourceKind::File { path, cache } => (path, cache),
        };

        let text = read_document(path).await?;
        {
            let guard = cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = guard.as_ref().filter(|c| c.text == text) {
                return Ok(Arc::clone(&cached.connections));
            }
        }

        let connections = Arc::new(parse_document(path, &text)?);
        info!(
            path = %path.display(),
            count = connections.len(),
            "Loaded database configuration"
        );

        let mut guard = cache.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Cached {
            text,
            connections: Arc::clone(&connections),
        });
        debug!("Configuration cache updated");
        Ok(connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_normalize_flattens_and_tags_type() {
        let raw = json!({
            "postgresql": {
                "db1": { "host": "h", "user": "u", "password": "p", "database": "d" }
            }
        });
        let connections = normalize(&raw).unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(
            serde_json::to_value(&connections["db1"]).unwrap(),
            json!({ "host": "h", "user": "u", "password": "p", "database": "d", "type": "postgresql" })
        );
    }

    #[test]
    fn test_normalize_resolves_aliases() {
        let raw = json!({
            "PG": { "a": { "host": "h" } },
            "mariadb": { "b": { "host": "h" } },
            "sql server": { "c": { "host": "h" } },
            "sqlite3": { "d": { "database": ":memory:" } }
        });
        let connections = normalize(&raw).unwrap();
        assert_eq!(connections["a"].backend_type, BackendType::PostgreSQL);
        assert_eq!(connections["b"].backend_type, BackendType::MySQL);
        assert_eq!(connections["c"].backend_type, BackendType::SqlServer);
        assert_eq!(connections["d"].backend_type, BackendType::SQLite);
    }

    #[test]
    fn test_normalize_rejects_unknown_type() {
        let raw = json!({ "oracle": { "legacy": { "host": "h" } } });
        let err = normalize(&raw).unwrap_err();
        assert!(matches!(err, DbError::Config { .. }));
        let msg = err.to_string();
        assert!(msg.contains("'oracle'"));
        for alias in ["postgresql", "mysql", "sqlserver", "sqlite"] {
            assert!(msg.contains(alias), "missing {alias} in: {msg}");
        }
    }

    #[test]
    fn test_normalize_rejects_non_object_section() {
        let raw = json!({ "mysql": ["not", "a", "map"] });
        let err = normalize(&raw).unwrap_err();
        assert!(err.to_string().contains("Expected a dictionary"));
    }

    #[test]
    fn test_normalize_rejects_non_object_entry() {
        let raw = json!({ "sqlite": { "broken": "just a string" } });
        let err = normalize(&raw).unwrap_err();
        assert!(err.to_string().contains("'broken'"));
    }

    #[test]
    fn test_normalize_rejects_duplicate_names_across_sections() {
        let raw = json!({
            "postgresql": { "shared": { "host": "a" } },
            "mysql": { "shared": { "host": "b" } }
        });
        let err = normalize(&raw).unwrap_err();
        assert!(err.to_string().contains("Duplicate database name 'shared'"));
    }

    #[test]
    fn test_normalize_rejects_non_object_root() {
        assert!(normalize(&json!([1, 2])).is_err());
    }

    #[tokio::test]
    async fn test_file_source_reloads_after_edit() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"sqlite": {{"one": {{"database": ":memory:"}}}}}}"#).unwrap();
        file.flush().unwrap();

        let source = ConfigSource::file(file.path());
        let first = source.load().await.unwrap();
        assert!(first.contains_key("one"));

        let again = source.load().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        std::fs::write(
            file.path(),
            r#"{"sqlite": {"one": {"database": ":memory:"}, "two": {"database": ":memory:"}}}"#,
        )
        .unwrap();
        let reloaded = source.load().await.unwrap();
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn test_file_source_sees_same_size_edit_with_unchanged_mtime() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"sqlite": {"aaa": {"database": ":memory:"}}}"#).unwrap();
        let mtime = std::fs::metadata(file.path()).unwrap().modified().unwrap();

        let source = ConfigSource::file(file.path());
        assert!(source.load().await.unwrap().contains_key("aaa"));

        std::fs::write(file.path(), r#"{"sqlite": {"bbb": {"database": ":memory:"}}}"#).unwrap();
        std::fs::File::options()
            .write(true)
            .open(file.path())
            .unwrap()
            .set_modified(mtime)
            .unwrap();

        let reloaded = source.load().await.unwrap();
        assert!(reloaded.contains_key("bbb"));
        assert!(!reloaded.contains_key("aaa"));
    }

    #[tokio::test]
    async fn test_file_source_missing_file_is_config_error() {
        let source = ConfigSource::file("/definitely/not/here/databases.json");
        let err = source.load().await.unwrap_err();
        assert!(matches!(err, DbError::Config { .. }));
    }

    #[tokio::test]
    async fn test_file_source_malformed_json_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        file.flush().unwrap();
        let err = ConfigSource::file(file.path()).load().await.unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_cli_defaults() {
        let config = Config::try_parse_from(["multidb-mcp-server"]).unwrap();
        assert!(!config.no_preconnect);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_cli_config_flag() {
        let config =
            Config::try_parse_from(["multidb-mcp-server", "--config", "/tmp/dbs.json"]).unwrap();
        assert_eq!(config.config_path, PathBuf::from("/tmp/dbs.json"));
    }
}
