//! Query-related data models.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// One result record: column name to JSON value, in result-set column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Outcome for a single target of a fan-out query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FanOutOutcome {
    Rows(Vec<Row>),
    Error { error: String },
}

impl FanOutOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Rows of a successful outcome.
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Self::Rows(rows) => Some(rows),
            Self::Error { .. } => None,
        }
    }
}

/// Fan-out results keyed by logical database name.
pub type FanOutResults = BTreeMap<String, FanOutOutcome>;
