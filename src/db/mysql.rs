//! MySQL / MariaDB backend over a sqlx `MySqlPool`.
//!
//! Catalog statements take an optional schema and fall back to the
//! connection's current database, so each one runs exactly once whether or
//! not a schema was supplied.

use crate::config::{DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_MIN_CONNECTIONS, DEFAULT_POOL_SIZE};
use crate::db::driver::{BackendDriver, connection_suggestion, required};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{BackendType, ColumnDescriptor, ConnectionConfig, Row, TableEntry};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{MySqlPool, Row as _};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT TABLE_NAME AS name, TABLE_TYPE AS kind
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY TABLE_NAME
        "#;

    pub const DESCRIBE_TABLE: &str = r#"
        SELECT
            COLUMN_NAME AS name,
            DATA_TYPE AS data_type,
            IS_NULLABLE AS is_nullable,
            COLUMN_DEFAULT AS column_default,
            CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS max_length
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
        AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
        "#;

    pub const LIST_SCHEMAS: &str = r#"
        SELECT SCHEMA_NAME AS name
        FROM information_schema.SCHEMATA
        ORDER BY SCHEMA_NAME
        "#;
}

/// Safely get a string from a MySQL row.
/// Catalog columns may be VARBINARY depending on server version and collation.
fn get_string(row: &MySqlRow, column: &str) -> String {
    get_optional_string(row, column).unwrap_or_default()
}

/// Safely get an optional string from a MySQL row.
fn get_optional_string(row: &MySqlRow, column: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(column)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
}

#[derive(Debug, Clone, Default)]
pub struct MySqlDriver;

impl MySqlDriver {
    fn connect_options(config: &ConnectionConfig) -> DbResult<MySqlConnectOptions> {
        let params = &config.params;
        let host = required(config, "host", params.host.as_deref())?;
        let user = required(config, "user", params.user.as_deref())?;
        let password = required(config, "password", params.password.as_deref())?;
        let database = required(config, "database", params.database.as_deref())?;

        let mut options = MySqlConnectOptions::new()
            .host(host)
            .port(config.port().unwrap_or(3306))
            .username(user)
            .password(password)
            .database(database)
            .charset("utf8mb4");

        if let Some(mode) = params.ssl_mode.as_deref() {
            let mode = MySqlSslMode::from_str(mode).map_err(|e| {
                DbError::connection(
                    format!("Invalid ssl_mode '{}': {}", mode, e),
                    "Use one of: disabled, preferred, required, verify_ca, verify_identity",
                )
            })?;
            options = options.ssl_mode(mode);
        }
        Ok(options)
    }
}

impl BackendDriver for MySqlDriver {
    type Pool = MySqlPool;

    fn backend(&self) -> BackendType {
        BackendType::MySQL
    }

    async fn connect(&self, config: &ConnectionConfig) -> DbResult<MySqlPool> {
        let options = Self::connect_options(config)?;
        let target = config.describe_target();

        let pool = MySqlPoolOptions::new()
            .min_connections(DEFAULT_MIN_CONNECTIONS)
            .max_connections(DEFAULT_POOL_SIZE)
            .acquire_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS))
            .connect_with(options)
            .await
            .map_err(|e| {
                let message = e.to_string();
                DbError::connection(
                    format!("Cannot connect to MySQL at {}: {}", target, message),
                    connection_suggestion(BackendType::MySQL, &message),
                )
            })?;

        info!(endpoint = %target, "MySQL pool ready");
        Ok(pool)
    }

    async fn run_query(&self, pool: &MySqlPool, sql: &str) -> DbResult<Vec<Row>> {
        let rows = sqlx::query(sql).fetch_all(pool).await?;
        Ok(rows.iter().map(RowToJson::to_json_row).collect())
    }

    async fn list_tables(
        &self,
        pool: &MySqlPool,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableEntry>> {
        let rows = sqlx::query(queries::LIST_TABLES)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| TableEntry::new(get_string(row, "name"), get_string(row, "kind")))
            .collect())
    }

    async fn describe_table(
        &self,
        pool: &MySqlPool,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<ColumnDescriptor>> {
        let rows = sqlx::query(queries::DESCRIBE_TABLE)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await?;

        debug!(table = %table, columns = rows.len(), "Described table");
        Ok(rows
            .iter()
            .map(|row| {
                ColumnDescriptor::new(
                    get_string(row, "name"),
                    get_string(row, "data_type"),
                    get_string(row, "is_nullable") == "YES",
                )
                .with_default(get_optional_string(row, "column_default"))
                .with_max_length(row.try_get::<Option<i64>, _>("max_length").ok().flatten())
            })
            .collect())
    }

    async fn list_schemas(&self, pool: &MySqlPool) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::LIST_SCHEMAS).fetch_all(pool).await?;
        Ok(rows.iter().map(|row| get_string(row, "name")).collect())
    }

    async fn close(&self, pool: &MySqlPool) {
        pool.close().await;
        debug!("MySQL pool closed");
    }
}
