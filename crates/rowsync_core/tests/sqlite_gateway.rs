mod common;

use common::{person_schema, Person, AUTHORITY};
use rowsync_core::{
    BatchOperation, BatchResult, Contract, GatewayError, Manager, ResourceAddress, Row,
    SqliteGateway, StorageGateway, Value,
};
use std::sync::Arc;

fn people_contract() -> Arc<Contract> {
    Arc::new(Contract::from_schema(&person_schema(), AUTHORITY).unwrap())
}

fn ada_row() -> Row {
    let mut row = Row::new();
    row.put("_id", Value::Null);
    row.put("version", 1i64);
    row.put("name", "ada");
    row.put("age", 41i32);
    row
}

#[test]
fn register_creates_the_table_and_is_idempotent() {
    let gateway = SqliteGateway::open_in_memory().unwrap();
    let contract = people_contract();

    gateway.register(Arc::clone(&contract)).unwrap();
    gateway.register(Arc::clone(&contract)).unwrap();

    let rows = gateway
        .query_rows(&contract.collection_address(), &["_id"], None, &[], None, None)
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn unregistered_addresses_are_rejected() {
    let gateway = SqliteGateway::open_in_memory().unwrap();
    let foreign = ResourceAddress::parse("store://app.data/orders").unwrap();

    let err = gateway
        .query_rows(&foreign, &["_id"], None, &[], None, None)
        .unwrap_err();
    assert!(matches!(err, GatewayError::UnknownAddress(_)));
}

#[test]
fn columns_outside_the_projection_are_rejected() {
    let gateway = SqliteGateway::open_in_memory().unwrap();
    let contract = people_contract();
    gateway.register(Arc::clone(&contract)).unwrap();

    let err = gateway
        .query_rows(
            &contract.collection_address(),
            &["password"],
            None,
            &[],
            None,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, GatewayError::UnknownColumn(column) if column == "password"));
}

#[test]
fn insert_returns_the_assigned_item_address() {
    let gateway = SqliteGateway::open_in_memory().unwrap();
    let contract = people_contract();
    gateway.register(Arc::clone(&contract)).unwrap();

    let assigned = gateway
        .insert_row(&contract.collection_address(), &ada_row())
        .unwrap();

    assert!(contract.matches_item(&assigned));

    let rows = gateway
        .query_rows(&assigned, &["_id", "name"], None, &[], None, None)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("ada".to_string())));
}

#[test]
fn insert_at_an_item_address_is_rejected() {
    let gateway = SqliteGateway::open_in_memory().unwrap();
    let contract = people_contract();
    gateway.register(Arc::clone(&contract)).unwrap();

    let err = gateway
        .insert_row(&contract.item_address(3), &ada_row())
        .unwrap_err();
    assert!(matches!(err, GatewayError::UnknownAddress(_)));
}

#[test]
fn item_addresses_scope_caller_predicates() {
    let gateway = SqliteGateway::open_in_memory().unwrap();
    let contract = people_contract();
    gateway.register(Arc::clone(&contract)).unwrap();

    let ada = gateway
        .insert_row(&contract.collection_address(), &ada_row())
        .unwrap();
    let mut brian = ada_row();
    brian.put("name", "brian");
    brian.put("age", 29i32);
    gateway
        .insert_row(&contract.collection_address(), &brian)
        .unwrap();

    // The predicate matches both rows, but the item address pins the id.
    let affected = gateway
        .delete_rows(&ada, Some("age > ?"), &[Value::Integer(10)])
        .unwrap();
    assert_eq!(affected, 1);

    let remaining = gateway
        .query_rows(
            &contract.collection_address(),
            &["name"],
            None,
            &[],
            None,
            None,
        )
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(
        remaining[0].get("name"),
        Some(&Value::Text("brian".to_string()))
    );
}

#[test]
fn failed_batches_roll_back_completely() {
    let gateway = SqliteGateway::open_in_memory().unwrap();
    let contract = people_contract();
    gateway.register(Arc::clone(&contract)).unwrap();

    let mut bad_row = ada_row();
    bad_row.put("password", "secret");

    let operations = vec![
        BatchOperation::Insert {
            address: contract.collection_address(),
            row: ada_row(),
        },
        BatchOperation::Insert {
            address: contract.collection_address(),
            row: bad_row,
        },
    ];

    let err = gateway.apply_batch(&operations).unwrap_err();
    assert!(matches!(err, GatewayError::UnknownColumn(_)));

    // The first insert must not survive the failed batch.
    let rows = gateway
        .query_rows(&contract.collection_address(), &["_id"], None, &[], None, None)
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn batch_results_come_back_in_submission_order() {
    let gateway = SqliteGateway::open_in_memory().unwrap();
    let contract = people_contract();
    gateway.register(Arc::clone(&contract)).unwrap();

    let assigned = gateway
        .insert_row(&contract.collection_address(), &ada_row())
        .unwrap();
    let id = assigned.id().unwrap();

    let mut renamed = Row::new();
    renamed.put("name", "lovelace");

    let operations = vec![
        BatchOperation::Insert {
            address: contract.collection_address(),
            row: ada_row(),
        },
        BatchOperation::Update {
            address: contract.item_address(id),
            row: renamed,
            predicate: None,
            args: Vec::new(),
        },
        BatchOperation::Delete {
            address: contract.item_address(9999),
            predicate: None,
            args: Vec::new(),
        },
    ];

    let results = gateway.apply_batch(&operations).unwrap();
    assert_eq!(results.len(), 3);
    assert!(matches!(&results[0], BatchResult::Inserted(address) if contract.matches_item(address)));
    assert_eq!(results[1], BatchResult::Affected(1));
    assert_eq!(results[2], BatchResult::Affected(0));
}

#[test]
fn file_backed_gateway_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rowsync.db");

    {
        let gateway = Arc::new(SqliteGateway::open(&path).unwrap());
        let manager = Manager::new(
            person_schema(),
            AUTHORITY,
            Arc::clone(&gateway) as Arc<dyn StorageGateway>,
        )
        .unwrap();
        gateway.register(manager.contract()).unwrap();
        manager.save(&Person::new("ada", 41)).unwrap();
    }

    let gateway = Arc::new(SqliteGateway::open(&path).unwrap());
    let manager = Manager::new(
        person_schema(),
        AUTHORITY,
        Arc::clone(&gateway) as Arc<dyn StorageGateway>,
    )
    .unwrap();
    gateway.register(manager.contract()).unwrap();

    let people = manager.all().unwrap();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].name, "ada");
    assert_eq!(people[0].version, 1);
}
