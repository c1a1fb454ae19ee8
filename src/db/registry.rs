//! Backend type tokens to driver instances.

use crate::db::driver::Driver;
use crate::db::mysql::MySqlDriver;
use crate::db::postgres::PostgresDriver;
use crate::db::sqlite::SqliteDriver;
use crate::db::sqlserver::{NativeClient, SqlServerDriver, default_client};
use crate::error::{DbError, DbResult};
use crate::models::BackendType;
use std::sync::Arc;

/// Resolves backend type tokens (including aliases) to drivers.
#[derive(Clone)]
pub struct Registry {
    sqlserver_client: Arc<dyn NativeClient>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_sqlserver_client(default_client())
    }
}

impl Registry {
    /// Registry whose SQL Server driver opens connections through `client`.
    pub fn with_sqlserver_client(client: Arc<dyn NativeClient>) -> Self {
        Self {
            sqlserver_client: client,
        }
    }

    /// Resolve a type token such as `"pg"` or `"MSSQL"`.
    pub fn resolve(&self, token: &str) -> DbResult<Driver> {
        BackendType::from_alias(token)
            .map(|backend| self.driver(backend))
            .ok_or_else(|| DbError::unsupported_backend(token))
    }

    pub fn driver(&self, backend: BackendType) -> Driver {
        match backend {
            BackendType::PostgreSQL => Driver::Postgres(PostgresDriver),
            BackendType::MySQL => Driver::MySql(MySqlDriver),
            BackendType::SqlServer => {
                Driver::SqlServer(SqlServerDriver::new(Arc::clone(&self.sqlserver_client)))
            }
            BackendType::SQLite => Driver::SQLite(SqliteDriver),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_aliases() {
        let registry = Registry::default();
        for (token, expected) in [
            ("postgres", BackendType::PostgreSQL),
            ("PG", BackendType::PostgreSQL),
            ("mariadb", BackendType::MySQL),
            ("mssql", BackendType::SqlServer),
            ("sql server", BackendType::SqlServer),
            ("sqlite3", BackendType::SQLite),
        ] {
            assert_eq!(registry.resolve(token).unwrap().backend(), expected, "{token}");
        }
    }

    #[test]
    fn test_resolve_unknown_token() {
        let err = Registry::default().resolve("oracle").unwrap_err();
        assert!(matches!(err, DbError::UnsupportedBackend { .. }));
        assert_eq!(
            err.to_string(),
            "Unsupported database type: oracle. Supported types: postgresql, mysql, sqlserver, sqlite"
        );
    }
}
