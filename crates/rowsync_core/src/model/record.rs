//! Identity and concurrency-token contract for stored records.
//!
//! # Responsibility
//! - Define the `Record` trait every managed type implements: a nullable
//!   64-bit id plus a monotonically increasing version.
//! - Provide `IdKey`, the hashable id wrapper reconciliation uses as a map
//!   key.
//!
//! # Invariants
//! - A record with `id() == None` has never been persisted.
//! - A persisted record's version strictly increases on every successful
//!   update, starting at 1 on first save.

/// A typed domain record with identity and a concurrency token.
///
/// The id and version accessors back the `_id` and `version` columns every
/// contract carries implicitly; they are never declared as column bindings.
pub trait Record: Clone {
    /// Unique identifier, or `None` when the record has never been saved.
    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: Option<i64>);

    /// Version used for optimistic-concurrency conflict detection.
    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);

    /// Whether the caller, not storage, owns id assignment for this record.
    fn id_managed_externally(&self) -> bool {
        false
    }

    /// Whether the caller, not storage, owns version assignment for this
    /// record. When true, updates apply only while the stored version is
    /// strictly older than the incoming one.
    fn version_managed_externally(&self) -> bool {
        false
    }
}

/// Id wrapper used as a reconciliation map key.
///
/// Unsaved records (no id yet) still participate in map semantics: they hash
/// and compare as the `None` key instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdKey(Option<i64>);

impl IdKey {
    pub fn of<T: Record>(record: &T) -> Self {
        Self(record.id())
    }

    pub fn id(self) -> Option<i64> {
        self.0
    }
}

impl From<Option<i64>> for IdKey {
    fn from(id: Option<i64>) -> Self {
        Self(id)
    }
}

impl From<i64> for IdKey {
    fn from(id: i64) -> Self {
        Self(Some(id))
    }
}
