//! Schema-related data models.
//!
//! Catalog listings are reported in the same shape for every backend; only the
//! declared type strings stay backend-native.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One table or view returned by list_tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableEntry {
    pub name: String,
    /// Catalog kind, e.g. "BASE TABLE" or "VIEW"
    #[serde(rename = "type")]
    pub kind: String,
}

impl TableEntry {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

/// Catalog kind strings as reported by `information_schema.tables`.
pub mod table_kind {
    pub const BASE_TABLE: &str = "BASE TABLE";
    pub const VIEW: &str = "VIEW";

    /// Map SQLite's `sqlite_master.type` onto the information_schema vocabulary.
    pub fn from_sqlite(kind: &str) -> &'static str {
        if kind.eq_ignore_ascii_case("view") {
            VIEW
        } else {
            BASE_TABLE
        }
    }
}

/// Column description returned by describe_table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Backend-native declared type
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    /// Default value expression
    pub default: Option<String>,
    /// Maximum character length, when the backend reports one
    pub max_length: Option<i64>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default: None,
            max_length: None,
        }
    }

    pub fn with_default(mut self, default: Option<String>) -> Self {
        self.default = default;
        self
    }

    pub fn with_max_length(mut self, max_length: Option<i64>) -> Self {
        self.max_length = max_length;
        self
    }
}
