//! Object-to-row mapping and synchronization over URI-addressed storage.
//! This crate is the single source of truth for the save and
//! reconciliation protocols.

pub mod contract;
pub mod logging;
pub mod manager;
pub mod mapper;
pub mod model;
pub mod notify;
pub mod storage;

pub use contract::address::{AddressFormatError, ResourceAddress, DEFAULT_SCHEME};
pub use contract::columns::{
    ColumnBinding, ConfigurationError, Schema, COLUMN_ID, COLUMN_VERSION,
};
pub use contract::Contract;
pub use logging::{default_log_level, init_logging, logging_status};
pub use manager::reconcile::{categorize, ReconcilePlan};
pub use manager::{Manager, ManagerError, ManagerResult, RecordQuery};
pub use mapper::RecordMapper;
pub use model::order::{Direction, SortOrder};
pub use model::record::{IdKey, Record};
pub use model::value::{Row, StorageType, Value};
pub use notify::{
    ChangeEvent, ChangeGateway, ChangeHub, ObserverHandle, Subscription, WatchMode,
};
pub use storage::sqlite::SqliteGateway;
pub use storage::{BatchOperation, BatchResult, GatewayError, GatewayResult, StorageGateway};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
