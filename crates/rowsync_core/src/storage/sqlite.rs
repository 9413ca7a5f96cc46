//! SQLite-backed storage gateway.
//!
//! # Responsibility
//! - Route collection/item addresses to registered contracts and their
//!   tables.
//! - Create tables from contract metadata and keep SQL details inside this
//!   persistence boundary.
//! - Run batches inside one transaction and publish change notifications
//!   after commit.
//!
//! # Invariants
//! - An item address contributes an `_id = ?` clause ANDed into any caller
//!   predicate.
//! - Locks are never nested: contract routing finishes before the
//!   connection is taken.

use super::{BatchOperation, BatchResult, GatewayError, GatewayResult, StorageGateway};
use crate::contract::address::ResourceAddress;
use crate::contract::columns::{COLUMN_ID, COLUMN_VERSION};
use crate::contract::Contract;
use crate::model::value::{Row, StorageType, Value};
use crate::notify::ChangeHub;
use log::{debug, info};
use rusqlite::types::ToSqlOutput;
use rusqlite::{params_from_iter, Connection, ToSql};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(value) => {
                ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*value)))
            }
            Value::Long(value) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*value)),
            Value::Text(value) => {
                ToSqlOutput::Borrowed(rusqlite::types::ValueRef::Text(value.as_bytes()))
            }
        })
    }
}

struct TableEntry {
    contract: Arc<Contract>,
    column_types: BTreeMap<String, StorageType>,
}

/// Storage gateway over a single SQLite database.
///
/// Contracts are registered up front; registration creates the matching
/// table when it does not exist yet.
pub struct SqliteGateway {
    conn: Mutex<Connection>,
    tables: RwLock<Vec<Arc<TableEntry>>>,
    hub: Option<Arc<ChangeHub>>,
}

impl SqliteGateway {
    /// Opens a file-backed gateway.
    pub fn open(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let conn = Connection::open(path).map_err(map_sqlite_error)?;

        info!("event=gateway_open module=storage status=ok mode=file");

        Self::from_connection(conn)
    }

    /// Opens an in-memory gateway, mostly for tests and tooling.
    pub fn open_in_memory() -> GatewayResult<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_error)?;

        info!("event=gateway_open module=storage status=ok mode=memory");

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> GatewayResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(map_sqlite_error)?;

        Ok(Self {
            conn: Mutex::new(conn),
            tables: RwLock::new(Vec::new()),
            hub: None,
        })
    }

    /// Attaches a change hub; every committed mutation publishes the
    /// affected address to it.
    pub fn with_change_hub(mut self, hub: Arc<ChangeHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Registers a contract, creating its table when missing. Registering
    /// the same table twice is a no-op.
    pub fn register(&self, contract: Arc<Contract>) -> GatewayResult<()> {
        {
            let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);

            if tables
                .iter()
                .any(|entry| entry.contract.table_name() == contract.table_name())
            {
                debug!(
                    "event=contract_register module=storage status=skipped table={}",
                    contract.table_name()
                );
                return Ok(());
            }
        }

        let sql = create_table_sql(&contract);

        {
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

            conn.execute_batch(&sql).map_err(map_sqlite_error)?;
        }

        let column_types = contract
            .table_definition()
            .iter()
            .map(|(name, storage)| (name.to_string(), *storage))
            .collect();

        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(TableEntry {
                contract: Arc::clone(&contract),
                column_types,
            }));

        info!(
            "event=contract_register module=storage status=ok table={}",
            contract.table_name()
        );

        Ok(())
    }

    /// Routes an address to its registered contract and, for item
    /// addresses, the addressed id.
    fn resolve(&self, address: &ResourceAddress) -> GatewayResult<(Arc<TableEntry>, Option<i64>)> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);

        for entry in tables.iter() {
            if entry.contract.matches_item(address) {
                return Ok((Arc::clone(entry), address.id()));
            }

            if entry.contract.matches_collection(address) {
                return Ok((Arc::clone(entry), None));
            }
        }

        Err(GatewayError::UnknownAddress(address.to_string()))
    }

    fn publish(&self, address: &ResourceAddress) {
        if let Some(hub) = &self.hub {
            hub.publish(address);
        }
    }
}

impl StorageGateway for SqliteGateway {
    fn query_rows(
        &self,
        address: &ResourceAddress,
        columns: &[&str],
        predicate: Option<&str>,
        args: &[Value],
        order_by: Option<&str>,
        limit: Option<u32>,
    ) -> GatewayResult<Vec<Row>> {
        let (entry, item_id) = self.resolve(address)?;

        for column in columns {
            if !entry.column_types.contains_key(*column) {
                return Err(GatewayError::UnknownColumn((*column).to_string()));
            }
        }

        let (clause, bound) = scoped_predicate(item_id, predicate, args);
        let mut sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            entry.contract.table_name()
        );

        if let Some(clause) = &clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }

        if let Some(order_by) = order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }

        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut statement = conn.prepare(&sql).map_err(map_sqlite_error)?;
        let mut sql_rows = statement
            .query(params_from_iter(bound.iter()))
            .map_err(map_sqlite_error)?;
        let mut rows = Vec::new();

        while let Some(sql_row) = sql_rows.next().map_err(map_sqlite_error)? {
            rows.push(read_row(sql_row, columns, &entry.column_types)?);
        }

        Ok(rows)
    }

    fn insert_row(&self, address: &ResourceAddress, row: &Row) -> GatewayResult<ResourceAddress> {
        let (entry, item_id) = self.resolve(address)?;

        if item_id.is_some() {
            return Err(GatewayError::UnknownAddress(address.to_string()));
        }

        let assigned = {
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            let id = exec_insert(&conn, &entry, row)?;

            entry.contract.item_address(id)
        };

        self.publish(&assigned);

        Ok(assigned)
    }

    fn update_rows(
        &self,
        address: &ResourceAddress,
        row: &Row,
        predicate: Option<&str>,
        args: &[Value],
    ) -> GatewayResult<usize> {
        let (entry, item_id) = self.resolve(address)?;
        let affected = {
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

            exec_update(&conn, &entry, item_id, row, predicate, args)?
        };

        if affected > 0 {
            self.publish(address);
        }

        Ok(affected)
    }

    fn delete_rows(
        &self,
        address: &ResourceAddress,
        predicate: Option<&str>,
        args: &[Value],
    ) -> GatewayResult<usize> {
        let (entry, item_id) = self.resolve(address)?;
        let affected = {
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

            exec_delete(&conn, &entry, item_id, predicate, args)?
        };

        if affected > 0 {
            self.publish(address);
        }

        Ok(affected)
    }

    fn apply_batch(&self, operations: &[BatchOperation]) -> GatewayResult<Vec<BatchResult>> {
        // Route everything before touching the connection so the transaction
        // never waits on contract state.
        let mut resolved = Vec::with_capacity(operations.len());

        for operation in operations {
            let address = match operation {
                BatchOperation::Insert { address, .. }
                | BatchOperation::Update { address, .. }
                | BatchOperation::Delete { address, .. } => address,
            };

            resolved.push(self.resolve(address)?);
        }

        let mut results = Vec::with_capacity(operations.len());
        let mut changed = Vec::new();

        {
            let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            let tx = conn.transaction().map_err(map_sqlite_error)?;

            for (operation, (entry, item_id)) in operations.iter().zip(&resolved) {
                match operation {
                    BatchOperation::Insert { address, row } => {
                        if item_id.is_some() {
                            return Err(GatewayError::UnknownAddress(address.to_string()));
                        }

                        let id = exec_insert(&tx, entry, row)?;
                        let assigned = entry.contract.item_address(id);

                        changed.push(assigned.clone());
                        results.push(BatchResult::Inserted(assigned));
                    }
                    BatchOperation::Update {
                        address,
                        row,
                        predicate,
                        args,
                    } => {
                        let affected =
                            exec_update(&tx, entry, *item_id, row, predicate.as_deref(), args)?;

                        if affected > 0 {
                            changed.push(address.clone());
                        }

                        results.push(BatchResult::Affected(affected));
                    }
                    BatchOperation::Delete {
                        address,
                        predicate,
                        args,
                    } => {
                        let affected =
                            exec_delete(&tx, entry, *item_id, predicate.as_deref(), args)?;

                        if affected > 0 {
                            changed.push(address.clone());
                        }

                        results.push(BatchResult::Affected(affected));
                    }
                }
            }

            tx.commit().map_err(map_sqlite_error)?;
        }

        debug!(
            "event=batch_apply module=storage status=ok operations={}",
            operations.len()
        );

        for address in &changed {
            self.publish(address);
        }

        Ok(results)
    }
}

fn exec_insert(conn: &Connection, entry: &TableEntry, row: &Row) -> GatewayResult<i64> {
    let mut columns = Vec::new();
    let mut values: Vec<&Value> = Vec::new();

    for (name, value) in row.iter() {
        if !entry.column_types.contains_key(name) {
            return Err(GatewayError::UnknownColumn(name.to_string()));
        }

        // A Null id means storage assigns one.
        if name == COLUMN_ID && *value == Value::Null {
            continue;
        }

        columns.push(name);
        values.push(value);
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        entry.contract.table_name(),
        columns.join(", "),
        placeholders
    );

    conn.execute(&sql, params_from_iter(values.iter()))
        .map_err(map_sqlite_error)?;

    Ok(conn.last_insert_rowid())
}

fn exec_update(
    conn: &Connection,
    entry: &TableEntry,
    item_id: Option<i64>,
    row: &Row,
    predicate: Option<&str>,
    args: &[Value],
) -> GatewayResult<usize> {
    let mut assignments = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    for (name, value) in row.iter() {
        if !entry.column_types.contains_key(name) {
            return Err(GatewayError::UnknownColumn(name.to_string()));
        }

        // The primary key is never reassigned.
        if name == COLUMN_ID {
            continue;
        }

        assignments.push(format!("{name} = ?"));
        values.push(value.clone());
    }

    let (clause, bound) = scoped_predicate(item_id, predicate, args);
    let mut sql = format!(
        "UPDATE {} SET {}",
        entry.contract.table_name(),
        assignments.join(", ")
    );

    if let Some(clause) = &clause {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }

    values.extend(bound);

    conn.execute(&sql, params_from_iter(values.iter()))
        .map_err(map_sqlite_error)
}

fn exec_delete(
    conn: &Connection,
    entry: &TableEntry,
    item_id: Option<i64>,
    predicate: Option<&str>,
    args: &[Value],
) -> GatewayResult<usize> {
    let (clause, bound) = scoped_predicate(item_id, predicate, args);
    let mut sql = format!("DELETE FROM {}", entry.contract.table_name());

    if let Some(clause) = &clause {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }

    conn.execute(&sql, params_from_iter(bound.iter()))
        .map_err(map_sqlite_error)
}

/// Combines the id an item address implies with any caller predicate.
fn scoped_predicate(
    item_id: Option<i64>,
    predicate: Option<&str>,
    args: &[Value],
) -> (Option<String>, Vec<Value>) {
    match (item_id, predicate) {
        (None, None) => (None, args.to_vec()),
        (None, Some(predicate)) => (Some(predicate.to_string()), args.to_vec()),
        (Some(id), None) => (
            Some(format!("{COLUMN_ID} = ?")),
            std::iter::once(Value::Long(id)).chain(args.iter().cloned()).collect(),
        ),
        (Some(id), Some(predicate)) => (
            Some(format!("{COLUMN_ID} = ? AND ({predicate})")),
            std::iter::once(Value::Long(id)).chain(args.iter().cloned()).collect(),
        ),
    }
}

fn read_row(
    sql_row: &rusqlite::Row<'_>,
    columns: &[&str],
    column_types: &BTreeMap<String, StorageType>,
) -> GatewayResult<Row> {
    let mut row = Row::new();

    for (index, column) in columns.iter().enumerate() {
        let storage = column_types
            .get(*column)
            .copied()
            .ok_or_else(|| GatewayError::UnknownColumn((*column).to_string()))?;
        let value_ref = sql_row.get_ref(index).map_err(map_sqlite_error)?;
        let value = match value_ref {
            rusqlite::types::ValueRef::Null => Value::Null,
            rusqlite::types::ValueRef::Integer(value) => match storage {
                StorageType::Integer => Value::Integer(i32::try_from(value).map_err(|_| {
                    GatewayError::Backend(
                        format!("column `{column}` holds {value}, outside the integer range")
                            .into(),
                    )
                })?),
                _ => Value::Long(value),
            },
            rusqlite::types::ValueRef::Text(bytes) => Value::Text(
                std::str::from_utf8(bytes)
                    .map_err(|_| {
                        GatewayError::Backend(
                            format!("column `{column}` holds non-UTF-8 text").into(),
                        )
                    })?
                    .to_string(),
            ),
            other => {
                return Err(GatewayError::Backend(
                    format!(
                        "column `{column}` holds unsupported storage class {:?}",
                        other.data_type()
                    )
                    .into(),
                ))
            }
        };

        row.put(*column, value);
    }

    Ok(row)
}

fn create_table_sql(contract: &Contract) -> String {
    let mut parts = Vec::new();

    for (name, storage) in contract.table_definition() {
        let sql_type = match storage {
            StorageType::Integer | StorageType::Long => "INTEGER",
            StorageType::Text => "TEXT",
        };
        let mut part = format!("{name} {sql_type}");

        if *name == COLUMN_ID {
            part.push_str(" PRIMARY KEY AUTOINCREMENT");
        } else if *name == COLUMN_VERSION {
            part.push_str(" NOT NULL");
        }

        parts.push(part);
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        contract.table_name(),
        parts.join(", ")
    )
}

fn map_sqlite_error(error: rusqlite::Error) -> GatewayError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &error {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            return GatewayError::DuplicateKey(error.to_string());
        }
    }

    GatewayError::Backend(Box::new(error))
}
