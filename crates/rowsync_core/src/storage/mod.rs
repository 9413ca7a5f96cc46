//! Storage gateway boundary: URI-addressed, batch-capable row CRUD.
//!
//! # Responsibility
//! - Define the row-level and batch primitives the manager layer drives.
//! - Keep the boundary free of any particular engine; `sqlite` provides the
//!   bundled implementation.
//!
//! # Invariants
//! - `apply_batch` is atomic: either every operation commits or none does.
//! - An item address implies an `id = ?` constraint ANDed into any caller
//!   predicate.

use crate::contract::address::ResourceAddress;
use crate::model::value::{Row, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod sqlite;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// A storage gateway operation failed.
#[derive(Debug)]
pub enum GatewayError {
    /// An insert collided with an existing key.
    DuplicateKey(String),
    /// The address matched no registered contract.
    UnknownAddress(String),
    /// A requested column is not part of the addressed contract's
    /// projection.
    UnknownColumn(String),
    /// The gateway could not be reached at all; no data was observed to
    /// change.
    Transport(String),
    /// The underlying engine rejected the operation.
    Backend(Box<dyn Error + Send + Sync>),
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateKey(detail) => write!(f, "duplicate key: {detail}"),
            Self::UnknownAddress(address) => {
                write!(f, "address `{address}` matches no registered contract")
            }
            Self::UnknownColumn(column) => {
                write!(f, "column `{column}` is not part of the addressed projection")
            }
            Self::Transport(detail) => write!(f, "gateway unreachable: {detail}"),
            Self::Backend(source) => write!(f, "storage backend error: {source}"),
        }
    }
}

impl Error for GatewayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// One operation inside an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOperation {
    Insert {
        address: ResourceAddress,
        row: Row,
    },
    Update {
        address: ResourceAddress,
        row: Row,
        predicate: Option<String>,
        args: Vec<Value>,
    },
    Delete {
        address: ResourceAddress,
        predicate: Option<String>,
        args: Vec<Value>,
    },
}

/// Result of one batch operation, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
    /// Address the inserted row can now be reached at, encoding its id.
    Inserted(ResourceAddress),
    /// Number of rows an update or delete affected.
    Affected(usize),
}

/// Row-level CRUD and atomic batches over addressed collections.
///
/// All methods are synchronous; callers wanting non-blocking behavior offload
/// to their own workers.
pub trait StorageGateway: Send + Sync {
    /// Queries rows at a collection or item address. An item address yields
    /// 0 or 1 rows. `limit` applies after ordering.
    fn query_rows(
        &self,
        address: &ResourceAddress,
        columns: &[&str],
        predicate: Option<&str>,
        args: &[Value],
        order_by: Option<&str>,
        limit: Option<u32>,
    ) -> GatewayResult<Vec<Row>>;

    /// Inserts one row at a collection address, returning the item address
    /// the row can now be reached at.
    fn insert_row(&self, address: &ResourceAddress, row: &Row) -> GatewayResult<ResourceAddress>;

    /// Updates rows at an address, returning the affected count.
    fn update_rows(
        &self,
        address: &ResourceAddress,
        row: &Row,
        predicate: Option<&str>,
        args: &[Value],
    ) -> GatewayResult<usize>;

    /// Deletes rows at an address, returning the affected count.
    fn delete_rows(
        &self,
        address: &ResourceAddress,
        predicate: Option<&str>,
        args: &[Value],
    ) -> GatewayResult<usize>;

    /// Applies the operations as one atomic unit, all or nothing.
    fn apply_batch(&self, operations: &[BatchOperation]) -> GatewayResult<Vec<BatchResult>>;
}
