//! Collection reconciliation: diffing a target collection against stored
//! state.
//!
//! # Responsibility
//! - Categorize an incoming collection against existing records into
//!   add/update/remove sets.
//!
//! # Invariants
//! - Version comparison is strict greater-than: equal or older incoming
//!   versions are silent no-ops, so re-submitting an unchanged collection
//!   issues zero operations.
//! - Every incoming record lands in exactly one of: to_add, to_update, or
//!   the silent no-op set.

use crate::model::record::{IdKey, Record};
use std::collections::BTreeMap;

/// Minimal write set turning stored state into a target collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan<T> {
    /// Incoming records whose ids are not stored yet, in input order.
    pub to_add: Vec<T>,
    /// Incoming records with a stored counterpart and a strictly newer
    /// version, in input order.
    pub to_update: Vec<T>,
    /// Stored records the incoming collection no longer mentions, in id
    /// order.
    pub to_remove: Vec<T>,
}

impl<T> ReconcilePlan<T> {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }

    pub fn operation_count(&self) -> usize {
        self.to_add.len() + self.to_update.len() + self.to_remove.len()
    }
}

/// Diffs `incoming` against `existing` by id.
///
/// Unsaved incoming records (no id) always categorize as additions; an
/// unsaved existing record keys under the `None` id like any other.
pub fn categorize<T: Record>(existing: Vec<T>, incoming: &[T]) -> ReconcilePlan<T> {
    let mut remaining: BTreeMap<IdKey, T> = existing
        .into_iter()
        .map(|record| (IdKey::of(&record), record))
        .collect();
    let mut to_add = Vec::new();
    let mut to_update = Vec::new();

    for record in incoming {
        match remaining.remove(&IdKey::of(record)) {
            Some(stored) => {
                if record.version() > stored.version() {
                    to_update.push(record.clone());
                }
            }
            None => to_add.push(record.clone()),
        }
    }

    ReconcilePlan {
        to_add,
        to_update,
        to_remove: remaining.into_values().collect(),
    }
}
