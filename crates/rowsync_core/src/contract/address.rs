//! Resource addresses for collections and items.
//!
//! # Responsibility
//! - Parse and format the `scheme://authority/table[/<decimal-id>]` shape.
//! - Reject every address with a path depth other than 1 or 2 segments.
//!
//! # Invariants
//! - A parsed address is always one of exactly two shapes: collection
//!   (1 segment) or item (2 segments, second one a decimal id).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Scheme used for addresses built by contracts.
pub const DEFAULT_SCHEME: &str = "store";

static ADDRESS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z][a-z0-9+.-]*)://([^/\s]+)/([^/\s]+?)(?:/(\d+))?$")
        .expect("address pattern is a valid regex")
});

pub type AddressResult<T> = Result<T, AddressFormatError>;

/// An address could not be parsed or classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressFormatError {
    /// The text does not have the `scheme://authority/table[/id]` shape.
    Malformed(String),
    /// The id segment is present but does not fit a 64-bit integer.
    UnparseableId(String),
    /// An id was required but the address names a whole collection.
    MissingId(String),
}

impl Display for AddressFormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(address) => {
                write!(f, "address `{address}` is not of the form scheme://authority/table[/id]")
            }
            Self::UnparseableId(address) => {
                write!(f, "address `{address}` has an id segment that is not a 64-bit integer")
            }
            Self::MissingId(address) => {
                write!(f, "address `{address}` names a collection, not a single item")
            }
        }
    }
}

impl Error for AddressFormatError {}

/// A parsed collection or item address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceAddress {
    scheme: String,
    authority: String,
    table: String,
    id: Option<i64>,
}

impl ResourceAddress {
    /// Builds a collection address: `scheme://authority/table`.
    pub fn collection(scheme: &str, authority: &str, table: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            table: table.to_string(),
            id: None,
        }
    }

    /// Builds an item address: `scheme://authority/table/<id>`.
    pub fn item(scheme: &str, authority: &str, table: &str, id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::collection(scheme, authority, table)
        }
    }

    /// Parses an address, failing on any shape other than 1 or 2 path
    /// segments after the authority.
    pub fn parse(text: &str) -> AddressResult<Self> {
        let captures = ADDRESS_PATTERN
            .captures(text)
            .ok_or_else(|| AddressFormatError::Malformed(text.to_string()))?;
        let id = match captures.get(4) {
            Some(id_match) => Some(
                id_match
                    .as_str()
                    .parse::<i64>()
                    .map_err(|_| AddressFormatError::UnparseableId(text.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            scheme: captures[1].to_string(),
            authority: captures[2].to_string(),
            table: captures[3].to_string(),
            id,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Id segment, when this is an item address.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn has_id(&self) -> bool {
        self.id.is_some()
    }

    /// The item form of this address for the given id.
    pub fn with_id(&self, id: i64) -> Self {
        Self {
            id: Some(id),
            ..self.clone()
        }
    }
}

impl Display for ResourceAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.authority, self.table)?;

        if let Some(id) = self.id {
            write!(f, "/{id}")?;
        }

        Ok(())
    }
}

impl FromStr for ResourceAddress {
    type Err = AddressFormatError;

    fn from_str(text: &str) -> AddressResult<Self> {
        Self::parse(text)
    }
}

#[cfg(test)]
mod tests {
    use super::{AddressFormatError, ResourceAddress};

    #[test]
    fn parse_and_format_round_trip() {
        for text in ["store://app.data/people", "store://app.data/people/42"] {
            let address = ResourceAddress::parse(text).expect("address should parse");
            assert_eq!(address.to_string(), text);
        }
    }

    #[test]
    fn parse_rejects_wrong_segment_counts() {
        for text in [
            "store://app.data",
            "store://app.data/",
            "store://app.data/people/42/extra",
            "not an address",
        ] {
            let result = ResourceAddress::parse(text);
            assert!(
                matches!(result, Err(AddressFormatError::Malformed(_))),
                "expected malformed error for `{text}`, got {result:?}"
            );
        }
    }

    #[test]
    fn parse_rejects_non_numeric_id_as_table_depth_mismatch() {
        // `people/abc` reads as a 2-segment path whose second segment is not
        // an id, which matches neither address shape.
        let result = ResourceAddress::parse("store://app.data/people/abc");
        assert!(matches!(result, Err(AddressFormatError::Malformed(_))));
    }

    #[test]
    fn parse_rejects_id_overflowing_64_bits() {
        let result = ResourceAddress::parse("store://app.data/people/99999999999999999999");
        assert!(matches!(result, Err(AddressFormatError::UnparseableId(_))));
    }
}
