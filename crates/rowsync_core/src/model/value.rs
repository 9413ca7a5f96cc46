//! Scalar storage values and the row shape exchanged with storage gateways.
//!
//! # Responsibility
//! - Define the three storage types a mapped column can declare.
//! - Define the typed scalar value a row cell can hold.
//! - Provide the ordered column-name -> value mapping (`Row`) used by every
//!   gateway primitive.
//!
//! # Invariants
//! - A `Value` either matches its column's declared `StorageType` or is
//!   `Null`; gateways and mappers reject anything else.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Storage type a mapped column declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer. Also the type of the `_id` and `version` columns.
    Long,
    /// UTF-8 text.
    Text,
}

impl Display for StorageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Text => "text",
        };

        write!(f, "{name}")
    }
}

/// One scalar cell value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Absent value. Compatible with every storage type.
    Null,
    Integer(i32),
    Long(i64),
    Text(String),
}

impl Value {
    /// Short name of the value kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Long(_) => "long",
            Self::Text(_) => "text",
        }
    }

    /// Whether this value can be stored in a column of the given type.
    pub fn matches(&self, storage: StorageType) -> bool {
        matches!(
            (self, storage),
            (Self::Null, _)
                | (Self::Integer(_), StorageType::Integer)
                | (Self::Long(_), StorageType::Long)
                | (Self::Text(_), StorageType::Text)
        )
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Option<i64>> for Value {
    fn from(value: Option<i64>) -> Self {
        match value {
            Some(value) => Self::Long(value),
            None => Self::Null,
        }
    }
}

/// A single stored row: column name mapped to a scalar value.
///
/// Column order is stable (sorted by name) so serialized rows and error
/// messages are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column value, replacing any previous value for that column.
    pub fn put(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over `(column, value)` pairs in column-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}
