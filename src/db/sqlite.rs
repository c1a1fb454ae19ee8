//! SQLite backend.
//!
//! A SQLite "pool" is a fixed set of independently opened connections to the
//! same file, handed out round-robin. Each connection sits behind an async
//! mutex, so a slot serves one statement at a time.

use crate::config::DEFAULT_POOL_SIZE;
use crate::db::driver::BackendDriver;
use crate::db::round_robin::RoundRobin;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{BackendType, ColumnDescriptor, ConnectionConfig, Row, TableEntry, table_kind};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row as _, SqliteConnection};
use std::str::FromStr;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, warn};

mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT name, type
        FROM sqlite_master
        WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
        ORDER BY name
        "#;

    pub const DESCRIBE_TABLE: &str = r#"
        SELECT name, type, "notnull", dflt_value
        FROM pragma_table_info(?1)
        ORDER BY cid
        "#;

    pub const DESCRIBE_TABLE_IN_SCHEMA: &str = r#"
        SELECT name, type, "notnull", dflt_value
        FROM pragma_table_info(?1, ?2)
        ORDER BY cid
        "#;
}

const MEMORY_PATH: &str = ":memory:";

/// Open SQLite connections for one logical database.
#[derive(Debug)]
pub struct SqliteConnections {
    path: String,
    slots: RoundRobin<Mutex<Option<SqliteConnection>>>,
}

impl SqliteConnections {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Lock the next connection in rotation.
    async fn acquire(&self) -> DbResult<MappedMutexGuard<'_, SqliteConnection>> {
        let slot = self.slots.next().ok_or_else(|| closed_error(&self.path))?;
        MutexGuard::try_map(slot.lock().await, Option::as_mut).map_err(|_| closed_error(&self.path))
    }
}

fn closed_error(path: &str) -> DbError {
    DbError::connection(
        format!("SQLite connections to '{}' are closed", path),
        "The connection was shut down; retry to reconnect",
    )
}

/// Quote an identifier for use in SQL text.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    fn connect_options(path: &str) -> DbResult<SqliteConnectOptions> {
        if path == MEMORY_PATH {
            // Shared-cache memory database so every slot sees the same data
            return SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
                DbError::connection(
                    format!("Invalid SQLite target '{}': {}", path, e),
                    "Check the database path in the configuration",
                )
            });
        }
        Ok(SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true))
    }

    fn column_from_row(row: &SqliteRow) -> ColumnDescriptor {
        let not_null: i64 = row.try_get("notnull").unwrap_or(0);
        ColumnDescriptor::new(
            row.try_get::<String, _>("name").unwrap_or_default(),
            row.try_get::<String, _>("type").unwrap_or_default(),
            not_null == 0,
        )
        .with_default(row.try_get::<Option<String>, _>("dflt_value").ok().flatten())
    }
}

impl BackendDriver for SqliteDriver {
    type Pool = SqliteConnections;

    fn backend(&self) -> BackendType {
        BackendType::SQLite
    }

    async fn connect(&self, config: &ConnectionConfig) -> DbResult<SqliteConnections> {
        let path = config.sqlite_path().to_string();
        let options = Self::connect_options(&path)?;

        let mut opened = Vec::with_capacity(DEFAULT_POOL_SIZE as usize);
        for _ in 0..DEFAULT_POOL_SIZE {
            match options.connect().await {
                Ok(conn) => opened.push(conn),
                Err(e) => {
                    for conn in opened {
                        if let Err(close_err) = conn.close().await {
                            warn!(path = %path, error = %close_err, "Failed to close SQLite connection");
                        }
                    }
                    return Err(DbError::connection(
                        format!("Cannot open SQLite database '{}': {}", path, e),
                        "Verify the file path exists and is accessible",
                    ));
                }
            }
        }

        info!(path = %path, connections = opened.len(), "Opened SQLite connections");
        Ok(SqliteConnections {
            path,
            slots: RoundRobin::new(opened.into_iter().map(|c| Mutex::new(Some(c))).collect()),
        })
    }

    async fn run_query(&self, pool: &SqliteConnections, sql: &str) -> DbResult<Vec<Row>> {
        let mut conn = pool.acquire().await?;
        let rows = sqlx::query(sql).fetch_all(&mut *conn).await?;
        Ok(rows.iter().map(RowToJson::to_json_row).collect())
    }

    async fn list_tables(
        &self,
        pool: &SqliteConnections,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableEntry>> {
        let sql = match schema {
            Some(s) if s != "main" => queries::LIST_TABLES
                .replace("FROM sqlite_master", &format!("FROM {}.sqlite_master", quote_ident(s))),
            _ => queries::LIST_TABLES.to_string(),
        };
        let mut conn = pool.acquire().await?;
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let kind: String = row.try_get("type").unwrap_or_default();
                TableEntry::new(
                    row.try_get::<String, _>("name").unwrap_or_default(),
                    table_kind::from_sqlite(&kind),
                )
            })
            .collect())
    }

    async fn describe_table(
        &self,
        pool: &SqliteConnections,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<ColumnDescriptor>> {
        let mut conn = pool.acquire().await?;
        let query = match schema {
            Some(s) => sqlx::query(queries::DESCRIBE_TABLE_IN_SCHEMA).bind(table).bind(s),
            None => sqlx::query(queries::DESCRIBE_TABLE).bind(table),
        };
        let rows = query.fetch_all(&mut *conn).await?;

        debug!(table = %table, columns = rows.len(), "Described SQLite table");
        Ok(rows.iter().map(Self::column_from_row).collect())
    }

    async fn list_schemas(&self, _pool: &SqliteConnections) -> DbResult<Vec<String>> {
        Ok(vec!["main".to_string()])
    }

    async fn close(&self, pool: &SqliteConnections) {
        for slot in pool.slots.iter() {
            let taken = slot.lock().await.take();
            if let Some(conn) = taken {
                if let Err(e) = conn.close().await {
                    warn!(path = %pool.path, error = %e, "Failed to close SQLite connection");
                }
            }
        }
        debug!(path = %pool.path, "SQLite connections closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionParams;

    fn memory_config() -> ConnectionConfig {
        ConnectionConfig::new("mem", BackendType::SQLite, ConnectionParams::default())
    }

    #[tokio::test]
    async fn test_memory_database_is_shared_across_slots() {
        let driver = SqliteDriver;
        let pool = driver.connect(&memory_config()).await.unwrap();
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.path(), ":memory:");

        driver
            .run_query(&pool, "CREATE TABLE t (id INTEGER PRIMARY KEY, label TEXT)")
            .await
            .unwrap();
        driver
            .run_query(&pool, "INSERT INTO t (label) VALUES ('x')")
            .await
            .unwrap();

        // Subsequent statements land on other slots
        for _ in 0..5 {
            let rows = driver.run_query(&pool, "SELECT count(*) AS n FROM t").await.unwrap();
            assert_eq!(rows[0]["n"], 1);
        }
        driver.close(&pool).await;
    }

    #[tokio::test]
    async fn test_query_after_close_is_connection_error() {
        let driver = SqliteDriver;
        let pool = driver.connect(&memory_config()).await.unwrap();
        driver.close(&pool).await;
        driver.close(&pool).await;

        let err = driver.run_query(&pool, "SELECT 1").await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_bad_sql_is_query_error() {
        let driver = SqliteDriver;
        let pool = driver.connect(&memory_config()).await.unwrap();
        let err = driver.run_query(&pool, "SELEC nonsense").await.unwrap_err();
        assert!(matches!(err, DbError::Query { .. }));
        driver.close(&pool).await;
    }

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("aux"), "\"aux\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
