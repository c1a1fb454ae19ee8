//! ODBC client for SQL Server, built with the `mssql` feature.

use crate::db::sqlserver::{NativeClient, NativeConnection};
use crate::db::types::decode_binary_value;
use crate::error::{DbError, DbResult};
use crate::models::Row;
use odbc_api::{Connection, ConnectionOptions, Cursor, DataType, Environment, ResultSetMetadata};
use serde_json::Value as JsonValue;
use std::sync::OnceLock;

fn environment() -> DbResult<&'static Environment> {
    static ENV: OnceLock<Environment> = OnceLock::new();
    if let Some(env) = ENV.get() {
        return Ok(env);
    }
    let env = Environment::new().map_err(|e| {
        DbError::connection(
            format!("Cannot initialise the ODBC environment: {}", e),
            "Check that unixODBC is installed",
        )
    })?;
    Ok(ENV.get_or_init(|| env))
}

fn query_error(e: odbc_api::Error) -> DbError {
    DbError::query(e.to_string(), None)
}

fn is_binary(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Binary { .. } | DataType::Varbinary { .. } | DataType::LongVarbinary { .. }
    )
}

/// Convert one cell according to the column's reported type.
fn cell_value(data_type: &DataType, cell: Option<&[u8]>) -> JsonValue {
    let Some(bytes) = cell else {
        return JsonValue::Null;
    };
    if is_binary(data_type) {
        return decode_binary_value(bytes, false);
    }
    let Ok(text) = std::str::from_utf8(bytes) else {
        return decode_binary_value(bytes, false);
    };
    match data_type {
        DataType::TinyInt | DataType::SmallInt | DataType::Integer | DataType::BigInt => text
            .trim()
            .parse::<i64>()
            .map(JsonValue::from)
            .unwrap_or_else(|_| JsonValue::String(text.to_string())),
        DataType::Real | DataType::Float { .. } | DataType::Double => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(text.to_string())),
        DataType::Bit => JsonValue::Bool(text.trim() == "1"),
        _ => JsonValue::String(text.to_string()),
    }
}

/// Driver manager backed client.
#[derive(Debug, Default)]
pub struct OdbcClient;

impl NativeClient for OdbcClient {
    fn installed_drivers(&self) -> DbResult<Vec<String>> {
        let drivers = environment()?.drivers().map_err(|e| {
            DbError::connection(
                format!("Cannot list ODBC drivers: {}", e),
                "Check the unixODBC installation",
            )
        })?;
        Ok(drivers.into_iter().map(|d| d.description).collect())
    }

    fn open(&self, connection_string: &str) -> DbResult<Box<dyn NativeConnection>> {
        let conn = environment()?
            .connect_with_connection_string(connection_string, ConnectionOptions::default())
            .map_err(|e| {
                DbError::connection(
                    e.to_string(),
                    "Check host, credentials and the Encrypt/TrustServerCertificate options",
                )
            })?;
        Ok(Box::new(OdbcConnection { conn }))
    }
}

struct OdbcConnection {
    conn: Connection<'static>,
}

impl NativeConnection for OdbcConnection {
    fn query(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        let Some(mut cursor) = self.conn.execute(sql, (), None).map_err(query_error)? else {
            // Statement produced no result set
            return Ok(Vec::new());
        };

        let names = cursor
            .column_names()
            .map_err(query_error)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(query_error)?;
        let types = (1..=names.len() as u16)
            .map(|col| cursor.col_data_type(col))
            .collect::<Result<Vec<DataType>, _>>()
            .map_err(query_error)?;

        // Row-wise reads grow the buffer to fit, so (MAX) columns arrive whole
        let mut rows = Vec::new();
        let mut buf = Vec::new();
        while let Some(mut fetched) = cursor.next_row().map_err(query_error)? {
            let mut row = Row::with_capacity(names.len());
            for (col, (name, data_type)) in (1u16..).zip(names.iter().zip(&types)) {
                buf.clear();
                let present = if is_binary(data_type) {
                    fetched.get_binary(col, &mut buf)
                } else {
                    fetched.get_text(col, &mut buf)
                }
                .map_err(query_error)?;
                row.insert(name.clone(), cell_value(data_type, present.then_some(buf.as_slice())));
            }
            rows.push(row);
        }
        Ok(rows)
    }
}
