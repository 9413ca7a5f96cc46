//! Per-type CRUD, query, and reconciliation façade.
//!
//! # Responsibility
//! - Compose a contract (addressing/columns) and a record mapper
//!   (serialization) over a storage gateway.
//! - Enforce the optimistic-concurrency save protocol for internally- and
//!   externally-managed versioning.
//! - Drive collection reconciliation as one atomic batch.
//!
//! # Invariants
//! - `save` returns `Ok(None)` only for the benign lost-race outcomes;
//!   every other failure is a distinguishable error.
//! - Reconciliation is all-or-nothing: a failed batch leaves no partial
//!   state behind, and every batch failure — transport included — surfaces
//!   as `ReconciliationFailed`.

use crate::contract::address::{AddressFormatError, ResourceAddress};
use crate::contract::columns::{ConfigurationError, Schema, COLUMN_ID, COLUMN_VERSION};
use crate::contract::Contract;
use crate::mapper::RecordMapper;
use crate::model::record::Record;
use crate::model::value::Value;
use crate::notify::{
    ChangeCallback, ChangeEvent, ChangeGateway, ObserverHandle, Subscription, WatchMode,
};
use crate::storage::{BatchOperation, BatchResult, GatewayError, StorageGateway};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

pub mod reconcile;

use reconcile::{categorize, ReconcilePlan};

pub type ManagerResult<T> = Result<T, ManagerError>;

/// A manager operation failed.
#[derive(Debug)]
pub enum ManagerError {
    /// The record type's column metadata is malformed. Fatal.
    Configuration(ConfigurationError),
    /// An address could not be classified or parsed.
    Address(AddressFormatError),
    /// A storage gateway primitive failed outside a batch.
    Gateway(GatewayError),
    /// The update target no longer exists in storage.
    NotFound(i64),
    /// The caller's record version is older than the stored version
    /// (internally-managed versioning only).
    StaleVersion {
        id: i64,
        stored: i64,
        incoming: i64,
    },
    /// An atomic batch failed to commit; no partial effects are visible.
    ReconciliationFailed(GatewayError),
    /// No change notification gateway was configured for this manager.
    NotificationsDisabled,
}

impl std::fmt::Display for ManagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(source) => write!(f, "{source}"),
            Self::Address(source) => write!(f, "{source}"),
            Self::Gateway(source) => write!(f, "{source}"),
            Self::NotFound(id) => {
                write!(f, "record {id} no longer exists in storage")
            }
            Self::StaleVersion {
                id,
                stored,
                incoming,
            } => write!(
                f,
                "record {id} is stale: stored version is {stored}, incoming version is {incoming}"
            ),
            Self::ReconciliationFailed(source) => {
                write!(f, "atomic batch failed to commit, no changes applied: {source}")
            }
            Self::NotificationsDisabled => {
                write!(f, "manager was built without a change notification gateway")
            }
        }
    }
}

impl std::error::Error for ManagerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Configuration(source) => Some(source),
            Self::Address(source) => Some(source),
            Self::Gateway(source) => Some(source),
            Self::ReconciliationFailed(source) => Some(source),
            Self::NotFound(_) | Self::StaleVersion { .. } | Self::NotificationsDisabled => None,
        }
    }
}

impl From<ConfigurationError> for ManagerError {
    fn from(source: ConfigurationError) -> Self {
        Self::Configuration(source)
    }
}

impl From<AddressFormatError> for ManagerError {
    fn from(source: AddressFormatError) -> Self {
        Self::Address(source)
    }
}

impl From<GatewayError> for ManagerError {
    fn from(source: GatewayError) -> Self {
        Self::Gateway(source)
    }
}

/// Filter, ordering, and bound for a list query.
///
/// `predicate` is a where-clause fragment with `?` placeholders bound from
/// `args`. When `order` is empty, results come back ascending by id. `limit`
/// applies after ordering.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub predicate: Option<String>,
    pub args: Vec<Value>,
    pub order: Vec<crate::model::order::SortOrder>,
    pub limit: Option<u32>,
}

/// CRUD/query/reconciliation façade for one record type.
///
/// Managers hold only immutable configuration plus the guarded
/// subscription registry; all operations are synchronous calls on the
/// caller's thread.
pub struct Manager<T: 'static> {
    contract: Arc<Contract>,
    mapper: RecordMapper<T>,
    gateway: Arc<dyn StorageGateway>,
    changes: Option<Arc<dyn ChangeGateway>>,
    subscriptions: Arc<Mutex<HashMap<Uuid, ObserverHandle>>>,
}

impl<T: Record + 'static> Manager<T> {
    /// Builds a manager for `schema` under `authority`.
    ///
    /// Schema validation happens here; a malformed declaration fails
    /// construction instead of a later operation.
    pub fn new(
        schema: Schema<T>,
        authority: &str,
        gateway: Arc<dyn StorageGateway>,
    ) -> ManagerResult<Self> {
        let contract = Arc::new(Contract::from_schema(&schema, authority)?);
        let mapper = RecordMapper::new(schema)?;

        Ok(Self {
            contract,
            mapper,
            gateway,
            changes: None,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Attaches a change notification gateway, enabling
    /// [`Manager::register_for_updates`].
    pub fn with_change_gateway(mut self, changes: Arc<dyn ChangeGateway>) -> Self {
        self.changes = Some(changes);
        self
    }

    /// The contract this manager routes through. Callers register it with
    /// their storage gateway before first use.
    pub fn contract(&self) -> Arc<Contract> {
        Arc::clone(&self.contract)
    }

    /// Every record in the collection. An empty collection is an empty
    /// vec, never an error.
    pub fn all(&self) -> ManagerResult<Vec<T>> {
        fetch_all(self.gateway.as_ref(), &self.contract, &self.mapper)
    }

    /// One record by id; absence is `None`, not an error.
    pub fn get(&self, id: i64) -> ManagerResult<Option<T>> {
        fetch_one(self.gateway.as_ref(), &self.contract, &self.mapper, id)
    }

    /// Filtered, ordered, bounded query.
    pub fn list(&self, query: &RecordQuery) -> ManagerResult<Vec<T>> {
        let order_clause = if query.order.is_empty() {
            COLUMN_ID.to_string()
        } else {
            query
                .order
                .iter()
                .map(|order| order.clause())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let rows = self.gateway.query_rows(
            &self.contract.collection_address(),
            self.contract.column_names(),
            query.predicate.as_deref(),
            &query.args,
            Some(&order_clause),
            query.limit,
        )?;

        rows.iter()
            .map(|row| self.mapper.from_row(row).map_err(ManagerError::from))
            .collect()
    }

    /// Number of stored records.
    pub fn count(&self) -> ManagerResult<usize> {
        self.count_matching(None, &[])
    }

    /// Number of stored records satisfying `predicate`.
    pub fn count_matching(
        &self,
        predicate: Option<&str>,
        args: &[Value],
    ) -> ManagerResult<usize> {
        let rows = self.gateway.query_rows(
            &self.contract.collection_address(),
            &[COLUMN_ID],
            predicate,
            args,
            None,
            None,
        )?;

        Ok(rows.len())
    }

    /// Saves or updates one record under the optimistic-concurrency
    /// protocol.
    ///
    /// Returns `Ok(None)` when the write lost a benign race (another writer
    /// got there first) and nothing was applied.
    pub fn save(&self, record: &T) -> ManagerResult<Option<T>> {
        if record.id_managed_externally() {
            let Some(id) = record.id() else {
                // Externally-managed id that was never assigned: nothing to
                // look up yet, treat as a first save.
                return self.perform_insert(record);
            };

            if self.get(id)?.is_some() {
                return self.perform_update(record);
            }

            match self.perform_insert(record) {
                Err(ManagerError::Gateway(GatewayError::DuplicateKey(detail))) => {
                    // Lost an insert race; if the row is there now, fall back
                    // to the update path.
                    if self.get(id)?.is_some() {
                        debug!(
                            "event=save module=manager status=insert_conflict table={} id={}",
                            self.contract.table_name(),
                            id
                        );
                        self.perform_update(record)
                    } else {
                        Err(GatewayError::DuplicateKey(detail).into())
                    }
                }
                outcome => outcome,
            }
        } else if record.id().is_none() {
            self.perform_insert(record)
        } else {
            self.perform_update(record)
        }
    }

    /// Saves each record in order, collecting only the applied results.
    pub fn save_all(&self, records: &[T]) -> ManagerResult<Vec<T>> {
        let mut saved = Vec::new();

        for record in records {
            if let Some(applied) = self.save(record)? {
                saved.push(applied);
            }
        }

        Ok(saved)
    }

    /// Deletes one record by id. Unsaved records delete nothing.
    pub fn delete(&self, record: &T) -> ManagerResult<usize> {
        let Some(id) = record.id() else {
            return Ok(0);
        };
        let affected =
            self.gateway
                .delete_rows(&self.contract.item_address(id), None, &[])?;

        Ok(affected)
    }

    /// Deletes one record only while its stored state also satisfies
    /// `predicate` (ANDed with the generated id clause).
    pub fn delete_where(
        &self,
        record: &T,
        predicate: &str,
        args: &[Value],
    ) -> ManagerResult<usize> {
        let Some(id) = record.id() else {
            return Ok(0);
        };
        let affected = self.gateway.delete_rows(
            &self.contract.item_address(id),
            Some(predicate),
            args,
        )?;

        Ok(affected)
    }

    /// Deletes every record satisfying `predicate`.
    pub fn delete_matching(&self, predicate: &str, args: &[Value]) -> ManagerResult<usize> {
        let affected = self.gateway.delete_rows(
            &self.contract.collection_address(),
            Some(predicate),
            args,
        )?;

        Ok(affected)
    }

    /// Deletes everything in the collection.
    pub fn clear(&self) -> ManagerResult<usize> {
        let affected = self
            .gateway
            .delete_rows(&self.contract.collection_address(), None, &[])?;

        info!(
            "event=clear module=manager status=ok table={} affected={}",
            self.contract.table_name(),
            affected
        );

        Ok(affected)
    }

    /// Deletes the given records as one atomic batch.
    pub fn delete_batch(&self, records: &[T]) -> ManagerResult<usize> {
        let operations: Vec<BatchOperation> = records
            .iter()
            .filter_map(Record::id)
            .map(|id| BatchOperation::Delete {
                address: self.contract.item_address(id),
                predicate: None,
                args: Vec::new(),
            })
            .collect();

        if operations.is_empty() {
            return Ok(0);
        }

        let results = self
            .gateway
            .apply_batch(&operations)
            .map_err(|source| self.batch_failure("delete_batch", source))?;
        let affected = results
            .iter()
            .map(|result| match result {
                BatchResult::Affected(count) => *count,
                BatchResult::Inserted(_) => 0,
            })
            .sum();

        Ok(affected)
    }

    /// Makes the stored collection exactly equal to `target`.
    pub fn replace(&self, target: &[T]) -> ManagerResult<Vec<T>> {
        self.reconcile(target, None, &[])
    }

    /// Makes the stored records matching `predicate` exactly equal to
    /// `target`.
    pub fn replace_matching(
        &self,
        target: &[T],
        predicate: &str,
        args: &[Value],
    ) -> ManagerResult<Vec<T>> {
        self.reconcile(target, Some(predicate), args)
    }

    fn reconcile(
        &self,
        target: &[T],
        predicate: Option<&str>,
        args: &[Value],
    ) -> ManagerResult<Vec<T>> {
        let existing = match predicate {
            Some(predicate) => self.list(&RecordQuery {
                predicate: Some(predicate.to_string()),
                args: args.to_vec(),
                ..RecordQuery::default()
            })?,
            None => self.all()?,
        };
        let plan = categorize(existing, target);

        if plan.is_empty() {
            debug!(
                "event=replace module=manager status=noop table={}",
                self.contract.table_name()
            );
            return Ok(Vec::new());
        }

        self.apply(&plan)
    }

    /// Submits a reconciliation plan as one atomic batch and returns the
    /// post-write state of every added or updated record.
    fn apply(&self, plan: &ReconcilePlan<T>) -> ManagerResult<Vec<T>> {
        let mut operations = Vec::with_capacity(plan.operation_count());

        // Relative order inside the batch: inserts, then updates, then
        // deletes.
        for record in &plan.to_add {
            operations.push(BatchOperation::Insert {
                address: self.contract.collection_address(),
                row: self.mapper.to_row(record)?,
            });
        }

        for record in &plan.to_update {
            let id = match record.id() {
                Some(id) => id,
                None => continue,
            };

            operations.push(BatchOperation::Update {
                address: self.contract.item_address(id),
                row: self.mapper.to_row(record)?,
                predicate: None,
                args: Vec::new(),
            });
        }

        for record in &plan.to_remove {
            let id = match record.id() {
                Some(id) => id,
                None => continue,
            };

            operations.push(BatchOperation::Delete {
                address: self.contract.item_address(id),
                predicate: None,
                args: Vec::new(),
            });
        }

        let results = self
            .gateway
            .apply_batch(&operations)
            .map_err(|source| self.batch_failure("replace", source))?;

        let mut written_ids: Vec<i64> = Vec::new();

        for result in &results {
            if let BatchResult::Inserted(address) = result {
                written_ids.push(self.contract.extract_id(address)?);
            }
        }

        written_ids.extend(plan.to_update.iter().filter_map(Record::id));

        info!(
            "event=replace module=manager status=ok table={} added={} updated={} removed={}",
            self.contract.table_name(),
            plan.to_add.len(),
            plan.to_update.len(),
            plan.to_remove.len()
        );

        self.get_by_ids(&written_ids)
    }

    /// Wraps a batch failure, logging transport failures distinctly: the
    /// gateway was never reached, so no data was observed to change.
    fn batch_failure(&self, operation: &str, source: GatewayError) -> ManagerError {
        match &source {
            GatewayError::Transport(detail) => warn!(
                "event={operation} module=manager status=transport_error table={} error={detail}",
                self.contract.table_name()
            ),
            _ => error!(
                "event={operation} module=manager status=error table={} error={source}",
                self.contract.table_name()
            ),
        }

        ManagerError::ReconciliationFailed(source)
    }

    fn get_by_ids(&self, ids: &[i64]) -> ManagerResult<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let id_list = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let predicate = format!("{COLUMN_ID} IN ({id_list})");

        self.list(&RecordQuery {
            predicate: Some(predicate),
            ..RecordQuery::default()
        })
    }

    fn perform_insert(&self, record: &T) -> ManagerResult<Option<T>> {
        let mut row = self.mapper.to_row(record)?;

        if !record.version_managed_externally() {
            // First save of an internally-managed record always lands at
            // version 1.
            row.put(COLUMN_VERSION, 1i64);
        }

        let assigned = self
            .gateway
            .insert_row(&self.contract.collection_address(), &row)?;
        let id = self.contract.extract_id(&assigned)?;
        let saved = self.get(id)?;

        if saved.is_none() {
            warn!(
                "event=save module=manager status=vanished table={} id={}",
                self.contract.table_name(),
                id
            );
        }

        Ok(saved)
    }

    fn perform_update(&self, record: &T) -> ManagerResult<Option<T>> {
        let Some(id) = record.id() else {
            return Ok(None);
        };
        let address = self.contract.item_address(id);

        if record.version_managed_externally() {
            // The write applies only while the stored version is strictly
            // older than the incoming one.
            let row = self.mapper.to_row(record)?;
            let predicate = format!("{COLUMN_VERSION} < ?");
            let affected = self.gateway.update_rows(
                &address,
                &row,
                Some(&predicate),
                &[Value::Long(record.version())],
            )?;

            if affected == 1 {
                return Ok(Some(record.clone()));
            }

            // 0 rows is ambiguous between "already at or beyond this
            // version" and "concurrently deleted"; a follow-up existence
            // check disambiguates.
            return match self.get(id)? {
                Some(_) => Ok(None),
                None => Err(ManagerError::NotFound(id)),
            };
        }

        let stored = self.get(id)?.ok_or(ManagerError::NotFound(id))?;

        if record.version() < stored.version() {
            return Err(ManagerError::StaleVersion {
                id,
                stored: stored.version(),
                incoming: record.version(),
            });
        }

        let mut updated = record.clone();

        updated.set_version(stored.version() + 1);

        let row = self.mapper.to_row(&updated)?;
        let predicate = format!("{COLUMN_VERSION} = ?");
        let affected = self.gateway.update_rows(
            &address,
            &row,
            Some(&predicate),
            &[Value::Long(stored.version())],
        )?;

        if affected == 1 {
            Ok(Some(updated))
        } else {
            Ok(None)
        }
    }
}

impl<T: Record + Send + 'static> Manager<T> {
    /// Subscribes to changes at the collection or one item.
    ///
    /// Fails with [`ManagerError::NotificationsDisabled`] when the manager
    /// was built without a change gateway.
    pub fn register_for_updates(&self, mode: WatchMode) -> ManagerResult<Subscription<T>> {
        let changes = self
            .changes
            .as_ref()
            .ok_or(ManagerError::NotificationsDisabled)?;
        let address = match mode {
            WatchMode::Collection => self.contract.collection_address(),
            WatchMode::Item(id) => self.contract.item_address(id),
        };
        let include_descendants = matches!(mode, WatchMode::Collection);
        let (sender, receiver) = mpsc::channel();
        let gateway = Arc::clone(&self.gateway);
        let contract = Arc::clone(&self.contract);
        let mapper = self.mapper;
        let sender = Mutex::new(sender);
        let callback: ChangeCallback = Arc::new(move |changed_address| {
            let event = match build_change_event(
                gateway.as_ref(),
                &contract,
                &mapper,
                mode,
                changed_address,
            ) {
                Ok(Some(event)) => event,
                Ok(None) => return,
                Err(source) => {
                    warn!(
                        "event=change_dispatch module=manager status=error table={} error={source}",
                        contract.table_name()
                    );
                    return;
                }
            };
            let sender = sender.lock().unwrap_or_else(PoisonError::into_inner);

            // A closed receiver just means the subscription was dropped.
            let _ = sender.send(event);
        });
        let handle = changes.subscribe(address, include_descendants, callback);

        Ok(Subscription::new(
            mode,
            receiver,
            handle,
            Arc::clone(changes),
            Arc::clone(&self.subscriptions),
        ))
    }

    /// Releases a subscription's observer. Returns false when it was
    /// already unregistered (documented no-op).
    pub fn unregister_for_updates(&self, subscription: &Subscription<T>) -> bool {
        subscription.cancel()
    }
}

fn fetch_all<T: Record>(
    gateway: &dyn StorageGateway,
    contract: &Contract,
    mapper: &RecordMapper<T>,
) -> ManagerResult<Vec<T>> {
    let rows = gateway.query_rows(
        &contract.collection_address(),
        contract.column_names(),
        None,
        &[],
        None,
        None,
    )?;

    rows.iter()
        .map(|row| mapper.from_row(row).map_err(ManagerError::from))
        .collect()
}

fn fetch_one<T: Record>(
    gateway: &dyn StorageGateway,
    contract: &Contract,
    mapper: &RecordMapper<T>,
    id: i64,
) -> ManagerResult<Option<T>> {
    let rows = gateway.query_rows(
        &contract.item_address(id),
        contract.column_names(),
        None,
        &[],
        None,
        None,
    )?;

    match rows.first() {
        Some(row) => Ok(Some(mapper.from_row(row)?)),
        None => Ok(None),
    }
}

fn build_change_event<T: Record>(
    gateway: &dyn StorageGateway,
    contract: &Contract,
    mapper: &RecordMapper<T>,
    mode: WatchMode,
    address: &ResourceAddress,
) -> ManagerResult<Option<ChangeEvent<T>>> {
    if contract.matches_item(address) {
        let id = contract.extract_id(address)?;

        return match fetch_one(gateway, contract, mapper, id)? {
            Some(record) => Ok(Some(ChangeEvent::Changed(record))),
            None => Ok(Some(ChangeEvent::Deleted(id))),
        };
    }

    if contract.matches_collection(address) && mode == WatchMode::Collection {
        return Ok(Some(ChangeEvent::CollectionChanged(fetch_all(
            gateway, contract, mapper,
        )?)));
    }

    Ok(None)
}
