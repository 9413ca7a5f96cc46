//! Per-type storage contracts: columns plus addressing.
//!
//! # Responsibility
//! - Derive table name, column list, projection allow-list, and content-type
//!   identifiers from a schema.
//! - Build collection/item addresses and classify foreign addresses as
//!   collection, item, or neither.
//!
//! # Invariants
//! - A contract is bound to one authority at construction; its classifier is
//!   built once there and is read-only afterwards, so matching needs no
//!   locking.
//! - Classification is total and exclusive: an address matches the
//!   collection shape, the item shape, or neither — never both.

use crate::model::value::StorageType;
use regex::Regex;
use std::collections::BTreeMap;

pub mod address;
pub mod columns;

use address::{AddressFormatError, AddressResult, ResourceAddress, DEFAULT_SCHEME};
use columns::{ConfigurationResult, Schema};

/// Addressing and column description for one record type under one
/// authority.
#[derive(Debug)]
pub struct Contract {
    table: &'static str,
    scheme: String,
    authority: String,
    column_names: Vec<&'static str>,
    table_definition: Vec<(&'static str, StorageType)>,
    projection: BTreeMap<&'static str, &'static str>,
    collection_pattern: Regex,
    item_pattern: Regex,
}

impl Contract {
    /// Builds a contract for the given schema, bound to `authority` with the
    /// default scheme. Validates the schema declaration.
    pub fn from_schema<T>(schema: &Schema<T>, authority: &str) -> ConfigurationResult<Self> {
        Self::with_scheme(schema, DEFAULT_SCHEME, authority)
    }

    /// Same as [`Contract::from_schema`] with an explicit scheme.
    pub fn with_scheme<T>(
        schema: &Schema<T>,
        scheme: &str,
        authority: &str,
    ) -> ConfigurationResult<Self> {
        schema.validate()?;

        let table_definition = schema.table_definition();
        let column_names: Vec<&'static str> =
            table_definition.iter().map(|(name, _)| *name).collect();
        let projection = column_names.iter().map(|name| (*name, *name)).collect();
        let root = format!(
            "^{}://{}/{}",
            regex::escape(scheme),
            regex::escape(authority),
            regex::escape(schema.table)
        );
        // The two-entry classifier: one code for the collection shape, one
        // for the item shape.
        let collection_pattern = Regex::new(&format!("{root}$"))
            .expect("collection pattern built from escaped parts is valid");
        let item_pattern = Regex::new(&format!(r"{root}/\d+$"))
            .expect("item pattern built from escaped parts is valid");

        Ok(Self {
            table: schema.table,
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            column_names,
            table_definition,
            projection,
            collection_pattern,
            item_pattern,
        })
    }

    pub fn table_name(&self) -> &'static str {
        self.table
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Ordered column names: `_id`, `version`, then the declared bindings.
    pub fn column_names(&self) -> &[&'static str] {
        &self.column_names
    }

    /// Allow-list mapping each known column name to itself. Gateways use it
    /// to validate requested projections.
    pub fn projection(&self) -> &BTreeMap<&'static str, &'static str> {
        &self.projection
    }

    /// `(column name, storage type)` per column; `_id` is the Long primary
    /// key, `version` a Long.
    pub fn table_definition(&self) -> &[(&'static str, StorageType)] {
        &self.table_definition
    }

    /// Content-type identifier for the collection form.
    pub fn content_type(&self) -> String {
        format!("vnd.rowsync.dir/{}", self.table)
    }

    /// Content-type identifier for the item form.
    pub fn content_item_type(&self) -> String {
        format!("vnd.rowsync.item/{}", self.table)
    }

    /// Address of the whole collection: `scheme://authority/table`.
    pub fn collection_address(&self) -> ResourceAddress {
        ResourceAddress::collection(&self.scheme, &self.authority, self.table)
    }

    /// Address of one item: `scheme://authority/table/<id>`.
    pub fn item_address(&self, id: i64) -> ResourceAddress {
        ResourceAddress::item(&self.scheme, &self.authority, self.table, id)
    }

    /// Whether the address names this contract's collection as a whole.
    pub fn matches_collection(&self, address: &ResourceAddress) -> bool {
        self.collection_pattern.is_match(&address.to_string())
    }

    /// Whether the address names one item of this contract's collection.
    pub fn matches_item(&self, address: &ResourceAddress) -> bool {
        self.item_pattern.is_match(&address.to_string())
    }

    /// Whether the address names this contract's collection or one of its
    /// items.
    pub fn matches(&self, address: &ResourceAddress) -> bool {
        self.matches_collection(address) || self.matches_item(address)
    }

    /// Whether the address carries an id segment for this contract.
    pub fn has_id(&self, address: &ResourceAddress) -> bool {
        self.matches_item(address)
    }

    /// Extracts the id from an item address of this contract.
    ///
    /// Fails when the address does not have exactly the collection/id shape
    /// for this contract.
    pub fn extract_id(&self, address: &ResourceAddress) -> AddressResult<i64> {
        if !self.matches_item(address) {
            return Err(AddressFormatError::MissingId(address.to_string()));
        }

        address
            .id()
            .ok_or_else(|| AddressFormatError::MissingId(address.to_string()))
    }
}
