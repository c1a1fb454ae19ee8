//! Backend capability interface.
//!
//! Every supported database speaks the same five operations through
//! [`BackendDriver`]. [`Driver`] wraps the four implementations and
//! [`DbPool`] the matching live handles, so the rest of the gateway never
//! names a concrete backend.

use crate::db::mysql::MySqlDriver;
use crate::db::postgres::PostgresDriver;
use crate::db::sqlite::{SqliteConnections, SqliteDriver};
use crate::db::sqlserver::{SqlServerDriver, SqlServerPool};
use crate::error::{DbError, DbResult};
use crate::models::{BackendType, ColumnDescriptor, ConnectionConfig, Row, TableEntry};
use sqlx::{MySqlPool, PgPool};
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// Operations one database backend provides.
pub trait BackendDriver: Send + Sync {
    /// Live handle produced by [`connect`](Self::connect).
    type Pool: Send + Sync;

    fn backend(&self) -> BackendType;

    /// Open a pool for the given configuration entry.
    fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> impl Future<Output = DbResult<Self::Pool>> + Send;

    /// Execute `sql` as given and return every row.
    fn run_query(
        &self,
        pool: &Self::Pool,
        sql: &str,
    ) -> impl Future<Output = DbResult<Vec<Row>>> + Send;

    /// Tables and views in `schema` (backend default when `None`), by name.
    fn list_tables(
        &self,
        pool: &Self::Pool,
        schema: Option<&str>,
    ) -> impl Future<Output = DbResult<Vec<TableEntry>>> + Send;

    /// Columns of `table` in ordinal order. Unknown tables yield an empty list.
    fn describe_table(
        &self,
        pool: &Self::Pool,
        table: &str,
        schema: Option<&str>,
    ) -> impl Future<Output = DbResult<Vec<ColumnDescriptor>>> + Send;

    fn list_schemas(&self, pool: &Self::Pool) -> impl Future<Output = DbResult<Vec<String>>> + Send;

    /// Release every connection. Idempotent; failures are logged, not returned.
    fn close(&self, pool: &Self::Pool) -> impl Future<Output = ()> + Send;
}

/// One of the four backend drivers.
#[derive(Debug, Clone)]
pub enum Driver {
    Postgres(PostgresDriver),
    MySql(MySqlDriver),
    SqlServer(SqlServerDriver),
    SQLite(SqliteDriver),
}

/// Live handle of one backend, paired with the [`Driver`] that opened it.
#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    MySql(MySqlPool),
    SqlServer(Arc<SqlServerPool>),
    SQLite(Arc<SqliteConnections>),
}

impl DbPool {
    pub fn backend(&self) -> BackendType {
        match self {
            DbPool::Postgres(_) => BackendType::PostgreSQL,
            DbPool::MySql(_) => BackendType::MySQL,
            DbPool::SqlServer(_) => BackendType::SqlServer,
            DbPool::SQLite(_) => BackendType::SQLite,
        }
    }
}

/// Error for a driver handed a pool it did not open.
pub(crate) fn pool_mismatch(driver: &Driver, pool: &DbPool) -> DbError {
    DbError::internal(format!(
        "{} driver was given a {} connection pool",
        driver.backend().display_name(),
        pool.backend().display_name()
    ))
}

/// Fetch a connection parameter that network backends cannot do without.
pub(crate) fn required<'a>(
    config: &ConnectionConfig,
    key: &str,
    value: Option<&'a str>,
) -> DbResult<&'a str> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| {
        DbError::connection(
            format!(
                "Missing required parameter '{}' for {} database '{}'",
                key,
                config.backend_type.display_name(),
                config.name
            ),
            format!("Add '{}' to the configuration entry", key),
        )
    })
}

/// Generate a helpful suggestion for connection errors.
pub(crate) fn connection_suggestion(backend: BackendType, error: &str) -> String {
    let error_str = error.to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            backend.display_name()
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the user and password in the configuration".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match backend {
        BackendType::SQLite => "Verify the file path exists and is accessible".to_string(),
        _ => "Verify host, port, user, password and database in the configuration".to_string(),
    }
}

impl Driver {
    pub fn backend(&self) -> BackendType {
        match self {
            Driver::Postgres(d) => d.backend(),
            Driver::MySql(d) => d.backend(),
            Driver::SqlServer(d) => d.backend(),
            Driver::SQLite(d) => d.backend(),
        }
    }

    pub async fn connect(&self, config: &ConnectionConfig) -> DbResult<DbPool> {
        match self {
            Driver::Postgres(d) => d.connect(config).await.map(DbPool::Postgres),
            Driver::MySql(d) => d.connect(config).await.map(DbPool::MySql),
            Driver::SqlServer(d) => d.connect(config).await.map(|p| DbPool::SqlServer(Arc::new(p))),
            Driver::SQLite(d) => d.connect(config).await.map(|p| DbPool::SQLite(Arc::new(p))),
        }
    }

    pub async fn run_query(&self, pool: &DbPool, sql: &str) -> DbResult<Vec<Row>> {
        impl_db_dispatch!(self, pool, |driver, p| driver.run_query(p, sql).await)
    }

    pub async fn list_tables(&self, pool: &DbPool, schema: Option<&str>) -> DbResult<Vec<TableEntry>> {
        impl_db_dispatch!(self, pool, |driver, p| driver.list_tables(p, schema).await)
    }

    pub async fn describe_table(
        &self,
        pool: &DbPool,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<ColumnDescriptor>> {
        impl_db_dispatch!(self, pool, |driver, p| driver
            .describe_table(p, table, schema)
            .await)
    }

    pub async fn list_schemas(&self, pool: &DbPool) -> DbResult<Vec<String>> {
        impl_db_dispatch!(self, pool, |driver, p| driver.list_schemas(p).await)
    }

    pub async fn close(&self, pool: &DbPool) {
        impl_db_dispatch!(self, pool, |driver, p| driver.close(p).await, mismatch => {
            warn!(error = %pool_mismatch(self, pool), "Skipping close");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::registry::Registry;
    use crate::models::ConnectionParams;

    #[tokio::test]
    async fn test_mismatched_pool_is_internal_error() {
        let registry = Registry::default();
        let sqlite = registry.driver(BackendType::SQLite);
        let config = ConnectionConfig::new("mem", BackendType::SQLite, ConnectionParams::default());
        let pool = sqlite.connect(&config).await.unwrap();

        let postgres = registry.driver(BackendType::PostgreSQL);
        let err = postgres.list_schemas(&pool).await.unwrap_err();
        assert!(matches!(err, DbError::Internal { .. }));
        assert!(err.to_string().contains("PostgreSQL driver"));

        // Close through the wrong driver is a no-op, the right one releases
        postgres.close(&pool).await;
        sqlite.close(&pool).await;
    }
}
