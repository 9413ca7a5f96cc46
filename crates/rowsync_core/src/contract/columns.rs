//! Column metadata: per-type description of storage shape.
//!
//! # Responsibility
//! - Define `ColumnBinding`, the (name, storage type, accessor) triple for
//!   one mapped field.
//! - Define `Schema`, the registration-time table description a `Manager`
//!   and its `Contract` are built from.
//! - Validate declarations eagerly so a broken type definition fails at
//!   registration, not in the middle of a query.
//!
//! # Invariants
//! - `_id` and `version` are reserved: carried by every table implicitly,
//!   never declared as bindings.
//! - Schemas are immutable after construction.

use crate::model::value::{StorageType, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Name of the primary-key column every table carries.
pub const COLUMN_ID: &str = "_id";

/// Name of the concurrency-token column every table carries.
pub const COLUMN_VERSION: &str = "version";

pub type ConfigurationResult<T> = Result<T, ConfigurationError>;

/// A record type's column metadata is malformed.
///
/// Configuration errors signal a broken type definition. They are fatal and
/// surface at registration or first use; nothing retries them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    EmptyTableName,
    /// A binding declared one of the implicit `_id`/`version` columns.
    ReservedColumn(&'static str),
    DuplicateColumn(&'static str),
    /// A row value or accessor result disagreed with the declared storage
    /// type.
    TypeMismatch {
        column: String,
        expected: StorageType,
        found: &'static str,
    },
    /// A row was missing a column the schema declares.
    MissingColumn(String),
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTableName => write!(f, "schema declares an empty table name"),
            Self::ReservedColumn(column) => {
                write!(f, "column `{column}` is reserved and carried implicitly")
            }
            Self::DuplicateColumn(column) => {
                write!(f, "column `{column}` is declared more than once")
            }
            Self::TypeMismatch {
                column,
                expected,
                found,
            } => write!(
                f,
                "column `{column}` is declared as {expected} but holds a {found} value"
            ),
            Self::MissingColumn(column) => {
                write!(f, "row is missing declared column `{column}`")
            }
        }
    }
}

impl Error for ConfigurationError {}

/// Accessor binding for one mapped column.
///
/// `read` produces the stored value for a record; `write` applies a stored
/// value to a record. The mapper guarantees `write` only ever sees a value
/// matching `storage` (or `Null`).
pub struct ColumnBinding<T> {
    pub name: &'static str,
    pub storage: StorageType,
    pub read: fn(&T) -> Value,
    pub write: fn(&mut T, Value),
}

impl<T> Clone for ColumnBinding<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ColumnBinding<T> {}

/// Registration-time description of one record type's table.
pub struct Schema<T: 'static> {
    /// Table (collection) name.
    pub table: &'static str,
    /// Bindings for every column other than the implicit `_id`/`version`.
    pub columns: &'static [ColumnBinding<T>],
    /// Identity constructor: builds a record carrying only id and version,
    /// ready for the column bindings to fill in.
    pub construct: fn(Option<i64>, i64) -> T,
}

impl<T> Schema<T> {
    /// Checks the declaration for reserved names, duplicates, and an empty
    /// table name.
    pub fn validate(&self) -> ConfigurationResult<()> {
        if self.table.trim().is_empty() {
            return Err(ConfigurationError::EmptyTableName);
        }

        for (index, binding) in self.columns.iter().enumerate() {
            if binding.name == COLUMN_ID || binding.name == COLUMN_VERSION {
                return Err(ConfigurationError::ReservedColumn(binding.name));
            }

            let duplicated = self.columns[..index]
                .iter()
                .any(|earlier| earlier.name == binding.name);

            if duplicated {
                return Err(ConfigurationError::DuplicateColumn(binding.name));
            }
        }

        Ok(())
    }

    /// Full table definition, `(column name, storage type)` per column, with
    /// the implicit `_id` (primary key) and `version` columns first.
    ///
    /// This is the surface the out-of-scope schema layer consumes to create
    /// matching storage.
    pub fn table_definition(&self) -> Vec<(&'static str, StorageType)> {
        let mut definition = vec![
            (COLUMN_ID, StorageType::Long),
            (COLUMN_VERSION, StorageType::Long),
        ];

        definition.extend(self.columns.iter().map(|binding| (binding.name, binding.storage)));

        definition
    }
}

impl<T> Clone for Schema<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Schema<T> {}
