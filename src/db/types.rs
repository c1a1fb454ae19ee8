//! Row decoding: native sqlx rows to JSON records.
//!
//! Each column is classified by its reported type name into a
//! [`TypeCategory`], then decoded by the backend module. Values with no JSON
//! counterpart (decimals, temporal values, geometry and other binary
//! payloads) become strings.

use crate::models::{BackendType, Row};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Type, TypeInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Temporal,
    Unknown,
}

/// Classify a backend type name such as `INT4`, `BIGINT UNSIGNED` or `TIMESTAMPTZ`.
pub fn categorize_type(type_name: &str, backend: BackendType) -> TypeCategory {
    let name = type_name.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

    match name.as_str() {
        // SQLite NUMERIC affinity holds plain floats
        "numeric" if backend == BackendType::SQLite => TypeCategory::Float,
        _ if has(&["decimal", "numeric"]) => TypeCategory::Decimal,
        "interval" | "point" => TypeCategory::Unknown,
        _ if has(&["int", "serial"]) => TypeCategory::Integer,
        "bool" | "boolean" => TypeCategory::Boolean,
        "real" => TypeCategory::Float,
        _ if has(&["float", "double"]) => TypeCategory::Float,
        "json" | "jsonb" => TypeCategory::Json,
        // Geometry travels as WKB
        "bytea" | "geometry" | "bit" => TypeCategory::Binary,
        _ if has(&["blob", "binary"]) => TypeCategory::Binary,
        "date" | "time" | "timetz" => TypeCategory::Temporal,
        _ if has(&["timestamp", "datetime"]) => TypeCategory::Temporal,
        "name" | "enum" => TypeCategory::Text,
        _ if has(&["char", "text"]) => TypeCategory::Text,
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Exact decimals
// =============================================================================

/// DECIMAL/NUMERIC value kept in its exact textual form.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        categorize_type(ty.name(), BackendType::MySQL) == TypeCategory::Decimal
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        // MySQL sends DECIMAL as ASCII digits in both protocols
        let text = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(text.to_owned()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        categorize_type(ty.name(), BackendType::PostgreSQL) == TypeCategory::Decimal
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        // Prepared statements return NUMERIC in the binary wire format
        let bytes = <&[u8] as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(pg_numeric_to_string(bytes)?))
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render a PostgreSQL binary NUMERIC (base-10000 digit groups) as text.
pub fn pg_numeric_to_string(bytes: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    use std::fmt::Write as _;

    if bytes.len() < 8 {
        return Err("NUMERIC value too short".into());
    }
    let read_u16 = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);
    let ndigits = read_u16(0) as usize;
    let weight = read_u16(2) as i16 as i32;
    let sign = read_u16(4);
    let dscale = read_u16(6) as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if bytes.len() < 8 + ndigits * 2 {
        return Err("NUMERIC digit groups truncated".into());
    }
    let digits: Vec<u16> = (0..ndigits).map(|i| read_u16(8 + i * 2)).collect();
    let digit_at = |pos: i32| -> u16 {
        if pos < 0 {
            0
        } else {
            digits.get(pos as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            if pos == 0 {
                write!(out, "{}", digit_at(pos))?;
            } else {
                write!(out, "{:04}", digit_at(pos))?;
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::new();
        let mut pos = weight + 1;
        while frac.len() < dscale {
            write!(frac, "{:04}", digit_at(pos))?;
            pos += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

// =============================================================================
// Scalar helpers
// =============================================================================

/// Render bytes as a JSON string.
///
/// With `prefer_text`, valid UTF-8 is returned as is; everything else is base64.
pub fn decode_binary_value(bytes: &[u8], prefer_text: bool) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    let text = if prefer_text {
        std::str::from_utf8(bytes).ok()
    } else {
        None
    };
    JsonValue::String(text.map_or_else(|| STANDARD.encode(bytes), str::to_owned))
}

/// Finite floats become numbers; NaN and infinities become strings.
fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Text that is parsed as JSON when the declared type says it holds JSON.
fn text_value(text: String, type_name: &str) -> JsonValue {
    if type_name.to_ascii_lowercase().contains("json") {
        if let Ok(json) = serde_json::from_str::<JsonValue>(&text) {
            return json;
        }
    }
    JsonValue::String(text)
}

fn display<T: ToString>(v: T) -> JsonValue {
    JsonValue::String(v.to_string())
}

fn rfc3339(v: chrono::DateTime<chrono::Utc>) -> JsonValue {
    JsonValue::String(v.to_rfc3339())
}

/// Decode column `$idx` as the first listed Rust type the driver accepts.
///
/// Yields `Some(JsonValue::Null)` for SQL NULL and `None` when no listed type
/// accepts the column.
macro_rules! first_decoded {
    ($row:expr, $idx:expr; $($ty:ty => $to_json:expr),+ $(,)?) => {
        'decoded: {
            $(
                if let Ok(value) = $row.try_get::<Option<$ty>, _>($idx) {
                    break 'decoded Some(value.map($to_json).unwrap_or(JsonValue::Null));
                }
            )+
            None
        }
    };
}

// =============================================================================
// Row to JSON
// =============================================================================

/// Conversion of a fetched row into a JSON record.
pub trait RowToJson {
    /// Column name to value, in result-set order.
    fn to_json_row(&self) -> Row;
}

fn collect_row<R: sqlx::Row>(row: &R, decode: fn(&R, usize, &str) -> JsonValue) -> Row {
    row.columns()
        .iter()
        .map(|col| {
            let value = decode(row, col.ordinal(), col.type_info().name());
            (col.name().to_string(), value)
        })
        .collect()
}

impl RowToJson for MySqlRow {
    fn to_json_row(&self) -> Row {
        collect_row(self, mysql::decode)
    }
}

impl RowToJson for PgRow {
    fn to_json_row(&self) -> Row {
        collect_row(self, postgres::decode)
    }
}

impl RowToJson for SqliteRow {
    fn to_json_row(&self) -> Row {
        collect_row(self, sqlite::decode)
    }
}

mod mysql {
    use super::*;
    use sqlx::Row as _;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub(super) fn decode(row: &MySqlRow, idx: usize, type_name: &str) -> JsonValue {
        let decoded = match categorize_type(type_name, BackendType::MySQL) {
            TypeCategory::Decimal => {
                first_decoded!(row, idx; RawDecimal => |d: RawDecimal| JsonValue::String(d.0))
            }
            TypeCategory::Integer => first_decoded!(row, idx;
                i64 => JsonValue::from,
                u64 => JsonValue::from,
                i32 => JsonValue::from,
                u32 => JsonValue::from,
                i16 => JsonValue::from,
                u16 => JsonValue::from,
                i8 => JsonValue::from,
                u8 => JsonValue::from,
            ),
            TypeCategory::Boolean => first_decoded!(row, idx; bool => JsonValue::Bool),
            TypeCategory::Float => first_decoded!(row, idx;
                f64 => float_value,
                f32 => |v: f32| float_value(v.into()),
            ),
            TypeCategory::Json => first_decoded!(row, idx; JsonValue => std::convert::identity),
            TypeCategory::Temporal => first_decoded!(row, idx;
                NaiveDateTime => display,
                DateTime<Utc> => rfc3339,
                NaiveDate => display,
                NaiveTime => display,
            ),
            TypeCategory::Binary => bytes(row, idx),
            TypeCategory::Text | TypeCategory::Unknown => {
                match row.try_get::<Option<String>, _>(idx) {
                    Ok(text) => Some(text.map_or(JsonValue::Null, |t| text_value(t, type_name))),
                    // Catalog and expression columns can come back as VARBINARY
                    Err(_) => bytes(row, idx),
                }
            }
        };
        decoded.unwrap_or(JsonValue::Null)
    }

    fn bytes(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
        first_decoded!(row, idx; Vec<u8> => |b: Vec<u8>| decode_binary_value(&b, true))
    }
}

mod postgres {
    use super::*;
    use sqlx::{Row as _, ValueRef};
    use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use sqlx::postgres::types::{PgInterval, PgMoney, PgTimeTz};
    use sqlx::types::Uuid;

    /// Non-null values never come back as JSON null: types without a native
    /// mapping are rendered from their wire bytes.
    pub(super) fn decode(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
        let raw = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw,
            Err(_) => return JsonValue::Null,
        };
        let category = categorize_type(type_name, BackendType::PostgreSQL);

        if let Some(value) = native(row, idx, category) {
            return value;
        }
        if let Some(value) = structured(row, idx, type_name) {
            return value;
        }
        match <&[u8] as Decode<sqlx::Postgres>>::decode(raw) {
            Ok(bytes) => wire_value(type_name, bytes)
                .unwrap_or_else(|| decode_binary_value(bytes, category != TypeCategory::Binary)),
            Err(_) => JsonValue::Null,
        }
    }

    fn native(row: &PgRow, idx: usize, category: TypeCategory) -> Option<JsonValue> {
        match category {
            TypeCategory::Decimal => {
                first_decoded!(row, idx; RawDecimal => |d: RawDecimal| JsonValue::String(d.0))
            }
            TypeCategory::Integer => first_decoded!(row, idx;
                i64 => JsonValue::from,
                i32 => JsonValue::from,
                i16 => JsonValue::from,
            ),
            TypeCategory::Boolean => first_decoded!(row, idx; bool => JsonValue::Bool),
            TypeCategory::Float => first_decoded!(row, idx;
                f64 => float_value,
                f32 => |v: f32| float_value(v.into()),
            ),
            TypeCategory::Json => first_decoded!(row, idx; JsonValue => std::convert::identity),
            TypeCategory::Temporal => first_decoded!(row, idx;
                DateTime<Utc> => rfc3339,
                NaiveDateTime => display,
                NaiveDate => display,
                NaiveTime => display,
            ),
            TypeCategory::Binary => {
                first_decoded!(row, idx; Vec<u8> => |b: Vec<u8>| decode_binary_value(&b, false))
            }
            TypeCategory::Text | TypeCategory::Unknown => {
                first_decoded!(row, idx; String => JsonValue::String)
            }
        }
    }

    /// Types sqlx decodes natively but which have no JSON counterpart.
    fn structured(row: &PgRow, idx: usize, type_name: &str) -> Option<JsonValue> {
        match type_name.to_ascii_lowercase().as_str() {
            "uuid" => first_decoded!(row, idx; Uuid => display),
            "interval" => first_decoded!(row, idx;
                PgInterval => |v: PgInterval| JsonValue::String(interval_text(&v)),
            ),
            "money" => first_decoded!(row, idx;
                PgMoney => |v: PgMoney| JsonValue::String(money_text(v.0)),
            ),
            "timetz" => first_decoded!(row, idx;
                PgTimeTz<NaiveTime, FixedOffset> =>
                    |v: PgTimeTz<NaiveTime, FixedOffset>| JsonValue::String(format!("{}{}", v.time, v.offset)),
            ),
            name if name.ends_with("[]") => first_decoded!(row, idx;
                Vec<Option<i64>> => |v: Vec<Option<i64>>| list(v, JsonValue::from),
                Vec<Option<i32>> => |v: Vec<Option<i32>>| list(v, JsonValue::from),
                Vec<Option<i16>> => |v: Vec<Option<i16>>| list(v, JsonValue::from),
                Vec<Option<bool>> => |v: Vec<Option<bool>>| list(v, JsonValue::Bool),
                Vec<Option<f64>> => |v: Vec<Option<f64>>| list(v, float_value),
                Vec<Option<f32>> => |v: Vec<Option<f32>>| list(v, |x: f32| float_value(x.into())),
                Vec<Option<Uuid>> => |v: Vec<Option<Uuid>>| list(v, display),
                Vec<Option<String>> => |v: Vec<Option<String>>| list(v, JsonValue::String),
            ),
            _ => None,
        }
    }

    fn list<T>(items: Vec<Option<T>>, to_json: impl Fn(T) -> JsonValue) -> JsonValue {
        items
            .into_iter()
            .map(|item| item.map(&to_json).unwrap_or(JsonValue::Null))
            .collect()
    }

    /// Binary wire formats of network, geometric and bit-string types.
    pub(super) fn wire_value(type_name: &str, bytes: &[u8]) -> Option<JsonValue> {
        let text = match type_name.to_ascii_lowercase().as_str() {
            "inet" | "cidr" => inet_text(bytes)?,
            "point" => point_text(bytes)?,
            "bit" | "varbit" => bit_text(bytes)?,
            _ => return None,
        };
        Some(JsonValue::String(text))
    }

    /// PostgreSQL's default interval output, e.g. `1 year 2 mons 3 days 04:05:06.5`.
    pub(super) fn interval_text(v: &PgInterval) -> String {
        let unit = |n: i64, name: &str| format!("{n} {name}{}", if n == 1 { "" } else { "s" });
        let mut parts = Vec::new();
        let (years, months) = (v.months / 12, v.months % 12);
        for (n, name) in [(years, "year"), (months, "mon"), (v.days, "day")] {
            if n != 0 {
                parts.push(unit(n.into(), name));
            }
        }
        if v.microseconds != 0 || parts.is_empty() {
            let sign = if v.microseconds < 0 { "-" } else { "" };
            let us = v.microseconds.unsigned_abs();
            let (secs, frac) = (us / 1_000_000, us % 1_000_000);
            let mut clock = format!(
                "{sign}{:02}:{:02}:{:02}",
                secs / 3600,
                secs / 60 % 60,
                secs % 60
            );
            if frac != 0 {
                let digits = format!("{frac:06}");
                clock.push('.');
                clock.push_str(digits.trim_end_matches('0'));
            }
            parts.push(clock);
        }
        parts.join(" ")
    }

    /// Money is an integer count of cents.
    pub(super) fn money_text(cents: i64) -> String {
        let sign = if cents < 0 { "-" } else { "" };
        let abs = cents.unsigned_abs();
        format!("{sign}{}.{:02}", abs / 100, abs % 100)
    }

    fn inet_text(bytes: &[u8]) -> Option<String> {
        let (&[family, bits, is_cidr, len], addr) = bytes.split_first_chunk::<4>()?;
        let (ip, full): (std::net::IpAddr, u8) = match (family, len) {
            (2, 4) => (<[u8; 4]>::try_from(addr).ok()?.into(), 32),
            (3, 16) => (<[u8; 16]>::try_from(addr).ok()?.into(), 128),
            _ => return None,
        };
        Some(if is_cidr != 0 || bits != full {
            format!("{ip}/{bits}")
        } else {
            ip.to_string()
        })
    }

    fn point_text(bytes: &[u8]) -> Option<String> {
        let coords: &[u8; 16] = bytes.try_into().ok()?;
        let x = f64::from_be_bytes(coords[..8].try_into().ok()?);
        let y = f64::from_be_bytes(coords[8..].try_into().ok()?);
        Some(format!("({x},{y})"))
    }

    fn bit_text(bytes: &[u8]) -> Option<String> {
        let (len, data) = bytes.split_first_chunk::<4>()?;
        let len = usize::try_from(i32::from_be_bytes(*len)).ok()?;
        if data.len() * 8 < len {
            return None;
        }
        Some(
            (0..len)
                .map(|i| if data[i / 8] & (0x80 >> (i % 8)) != 0 { '1' } else { '0' })
                .collect(),
        )
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Row as _, ValueRef};

    /// SQLite values carry their own storage class regardless of the declared
    /// column type, so the class decides how a value is read.
    pub(super) fn decode(row: &SqliteRow, idx: usize, type_name: &str) -> JsonValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw.type_info().name().to_string(),
            Err(_) => return JsonValue::Null,
        };
        let category = categorize_type(type_name, BackendType::SQLite);

        let value = match storage.as_str() {
            "INTEGER" if category == TypeCategory::Boolean => {
                row.try_get_unchecked::<i64, _>(idx).map(|v| JsonValue::Bool(v != 0))
            }
            "INTEGER" => row.try_get_unchecked::<i64, _>(idx).map(JsonValue::from),
            "REAL" => row.try_get_unchecked::<f64, _>(idx).map(float_value),
            "BLOB" => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(|b| decode_binary_value(&b, category != TypeCategory::Binary)),
            _ => row
                .try_get_unchecked::<String, _>(idx)
                .map(|t| text_value(t, type_name)),
        };
        value.unwrap_or(JsonValue::Null)
    }
}
