//! PostgreSQL backend over a sqlx `PgPool`.

use crate::config::{DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_MIN_CONNECTIONS, DEFAULT_POOL_SIZE};
use crate::db::driver::{BackendDriver, connection_suggestion, required};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{BackendType, ColumnDescriptor, ConnectionConfig, Row, TableEntry};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Row as _};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT table_name::text AS name, table_type::text AS kind
        FROM information_schema.tables
        WHERE table_schema = $1
        ORDER BY table_name
        "#;

    pub const DESCRIBE_TABLE: &str = r#"
        SELECT
            column_name::text AS name,
            data_type::text AS data_type,
            is_nullable::text AS is_nullable,
            column_default::text AS column_default,
            character_maximum_length::int8 AS max_length
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
        ORDER BY ordinal_position
        "#;

    pub const LIST_SCHEMAS: &str = r#"
        SELECT schema_name::text AS name
        FROM information_schema.schemata
        WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
        AND schema_name NOT LIKE 'pg\_temp\_%'
        AND schema_name NOT LIKE 'pg\_toast\_temp\_%'
        ORDER BY schema_name
        "#;
}

const DEFAULT_SCHEMA: &str = "public";

#[derive(Debug, Clone, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    fn connect_options(config: &ConnectionConfig) -> DbResult<PgConnectOptions> {
        let params = &config.params;
        let host = required(config, "host", params.host.as_deref())?;
        let user = required(config, "user", params.user.as_deref())?;
        let password = required(config, "password", params.password.as_deref())?;
        let database = required(config, "database", params.database.as_deref())?;

        let mut options = PgConnectOptions::new()
            .host(host)
            .port(config.port().unwrap_or(5432))
            .username(user)
            .password(password)
            .database(database);

        if let Some(mode) = params.ssl_mode.as_deref() {
            let mode = PgSslMode::from_str(mode).map_err(|e| {
                DbError::connection(
                    format!("Invalid ssl_mode '{}': {}", mode, e),
                    "Use one of: disable, allow, prefer, require, verify-ca, verify-full",
                )
            })?;
            options = options.ssl_mode(mode);
        }
        Ok(options)
    }
}

impl BackendDriver for PostgresDriver {
    type Pool = PgPool;

    fn backend(&self) -> BackendType {
        BackendType::PostgreSQL
    }

    async fn connect(&self, config: &ConnectionConfig) -> DbResult<PgPool> {
        let options = Self::connect_options(config)?;
        let target = config.describe_target();

        let pool = PgPoolOptions::new()
            .min_connections(DEFAULT_MIN_CONNECTIONS)
            .max_connections(DEFAULT_POOL_SIZE)
            .acquire_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS))
            .connect_with(options)
            .await
            .map_err(|e| {
                let message = e.to_string();
                DbError::connection(
                    format!("Cannot connect to PostgreSQL at {}: {}", target, message),
                    connection_suggestion(BackendType::PostgreSQL, &message),
                )
            })?;

        info!(endpoint = %target, "PostgreSQL pool ready");
        Ok(pool)
    }

    async fn run_query(&self, pool: &PgPool, sql: &str) -> DbResult<Vec<Row>> {
        let rows = sqlx::query(sql).fetch_all(pool).await?;
        Ok(rows.iter().map(RowToJson::to_json_row).collect())
    }

    async fn list_tables(&self, pool: &PgPool, schema: Option<&str>) -> DbResult<Vec<TableEntry>> {
        let schema = schema.unwrap_or(DEFAULT_SCHEMA);
        let rows = sqlx::query(queries::LIST_TABLES)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        rows.iter()
            .map(|row| -> DbResult<TableEntry> {
                Ok(TableEntry::new(
                    row.try_get::<String, _>("name")?,
                    row.try_get::<String, _>("kind")?,
                ))
            })
            .collect()
    }

    async fn describe_table(
        &self,
        pool: &PgPool,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<ColumnDescriptor>> {
        let schema = schema.unwrap_or(DEFAULT_SCHEMA);
        let rows = sqlx::query(queries::DESCRIBE_TABLE)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await?;

        debug!(schema = %schema, table = %table, columns = rows.len(), "Described table");
        rows.iter()
            .map(|row| -> DbResult<ColumnDescriptor> {
                let is_nullable: String = row.try_get("is_nullable")?;
                Ok(ColumnDescriptor::new(
                    row.try_get::<String, _>("name")?,
                    row.try_get::<String, _>("data_type")?,
                    is_nullable == "YES",
                )
                .with_default(row.try_get("column_default")?)
                .with_max_length(row.try_get("max_length")?))
            })
            .collect()
    }

    async fn list_schemas(&self, pool: &PgPool) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::LIST_SCHEMAS).fetch_all(pool).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(DbError::from))
            .collect()
    }

    async fn close(&self, pool: &PgPool) {
        pool.close().await;
        debug!("PostgreSQL pool closed");
    }
}
