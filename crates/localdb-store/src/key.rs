//! Record keys.
//!
//! A key is either an integer or a string. The two kinds never compare
//! equal, and integers sort before strings, which matches how SQLite orders
//! the untyped `records.key` column.

use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Key of a record within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    /// Interpret a command-line style argument: digits become an integer
    /// key, anything else a text key.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(n) => Self::Int(n),
            Err(_) => Self::Text(raw.to_string()),
        }
    }

    /// Convert a JSON value found at a key path into a key.
    ///
    /// Only integers and strings are valid keys.
    pub fn from_json(value: &serde_json::Value) -> StoreResult<Self> {
        match value {
            serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
            serde_json::Value::Number(n) => n.as_i64().map(Self::Int).ok_or_else(|| {
                StoreError::InvalidArgument(format!("key must be an integer, got {n}"))
            }),
            other => Err(StoreError::InvalidArgument(format!(
                "key must be an integer or a string, got {other}"
            ))),
        }
    }

    /// The key as a JSON value (used when writing a generated key back
    /// into a record).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl ToSql for Key {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Int(n) => n.to_sql(),
            Self::Text(s) => s.to_sql(),
        }
    }
}

impl FromSql for Key {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(n) => Ok(Self::Int(n)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| Self::Text(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
