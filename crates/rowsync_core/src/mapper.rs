//! Schema-driven conversion between rows and typed records.
//!
//! # Responsibility
//! - `to_row`: serialize a record into a row, always including `_id` and
//!   `version`.
//! - `from_row`: rebuild a record from a row via the schema's identity
//!   constructor and column bindings.
//!
//! # Invariants
//! - `from_row(to_row(record))` reproduces the record's field values
//!   exactly.
//! - A value that disagrees with its column's declared storage type is a
//!   configuration error (broken type definition), never silently coerced.

use crate::contract::columns::{
    ConfigurationError, ConfigurationResult, Schema, COLUMN_ID, COLUMN_VERSION,
};
use crate::model::record::Record;
use crate::model::value::{Row, StorageType, Value};

/// Bidirectional row <-> record converter for one schema.
pub struct RecordMapper<T: 'static> {
    schema: Schema<T>,
}

impl<T: Record> RecordMapper<T> {
    /// Validates the schema and builds a mapper for it.
    ///
    /// Validation failures are fatal configuration errors; they surface here,
    /// at registration time.
    pub fn new(schema: Schema<T>) -> ConfigurationResult<Self> {
        schema.validate()?;

        Ok(Self { schema })
    }

    pub fn schema(&self) -> &Schema<T> {
        &self.schema
    }

    /// Serializes a record into a row.
    ///
    /// `_id` is written as `Null` for unsaved records so storage can assign
    /// an id on insert.
    pub fn to_row(&self, record: &T) -> ConfigurationResult<Row> {
        let mut row = Row::new();

        row.put(COLUMN_ID, record.id());
        row.put(COLUMN_VERSION, record.version());

        for binding in self.schema.columns {
            let value = (binding.read)(record);

            if !value.matches(binding.storage) {
                return Err(ConfigurationError::TypeMismatch {
                    column: binding.name.to_string(),
                    expected: binding.storage,
                    found: value.kind(),
                });
            }

            row.put(binding.name, value);
        }

        Ok(row)
    }

    /// Rebuilds a record from a row.
    ///
    /// The record is constructed with the row's id and version, then every
    /// declared column is applied through its binding.
    pub fn from_row(&self, row: &Row) -> ConfigurationResult<T> {
        let id = typed_value(row, COLUMN_ID, StorageType::Long)?.as_long();
        let version = typed_value(row, COLUMN_VERSION, StorageType::Long)?
            .as_long()
            .unwrap_or(1);
        let mut record = (self.schema.construct)(id, version);

        for binding in self.schema.columns {
            let value = typed_value(row, binding.name, binding.storage)?;

            (binding.write)(&mut record, value.clone());
        }

        Ok(record)
    }
}

fn typed_value<'row>(
    row: &'row Row,
    column: &str,
    storage: StorageType,
) -> ConfigurationResult<&'row Value> {
    let value = row
        .get(column)
        .ok_or_else(|| ConfigurationError::MissingColumn(column.to_string()))?;

    if !value.matches(storage) {
        return Err(ConfigurationError::TypeMismatch {
            column: column.to_string(),
            expected: storage,
            found: value.kind(),
        });
    }

    Ok(value)
}

impl<T> Clone for RecordMapper<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RecordMapper<T> {}
