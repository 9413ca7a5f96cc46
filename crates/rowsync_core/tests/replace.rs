mod common;

use common::{person_manager, person_schema, Person, AUTHORITY};
use rowsync_core::{
    BatchOperation, BatchResult, GatewayError, GatewayResult, Manager, ManagerError,
    ResourceAddress, Row, SqliteGateway, StorageGateway, Value,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts batch submissions and, when armed, refuses them before they reach
/// storage.
struct UnreliableBatchGateway {
    inner: Arc<SqliteGateway>,
    fail_batches: AtomicBool,
    batches: AtomicUsize,
}

impl UnreliableBatchGateway {
    fn new(inner: Arc<SqliteGateway>) -> Self {
        Self {
            inner,
            fail_batches: AtomicBool::new(false),
            batches: AtomicUsize::new(0),
        }
    }

    fn fail_batches(&self) {
        self.fail_batches.store(true, Ordering::SeqCst);
    }

    fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

impl StorageGateway for UnreliableBatchGateway {
    fn query_rows(
        &self,
        address: &ResourceAddress,
        columns: &[&str],
        predicate: Option<&str>,
        args: &[Value],
        order_by: Option<&str>,
        limit: Option<u32>,
    ) -> GatewayResult<Vec<Row>> {
        self.inner
            .query_rows(address, columns, predicate, args, order_by, limit)
    }

    fn insert_row(&self, address: &ResourceAddress, row: &Row) -> GatewayResult<ResourceAddress> {
        self.inner.insert_row(address, row)
    }

    fn update_rows(
        &self,
        address: &ResourceAddress,
        row: &Row,
        predicate: Option<&str>,
        args: &[Value],
    ) -> GatewayResult<usize> {
        self.inner.update_rows(address, row, predicate, args)
    }

    fn delete_rows(
        &self,
        address: &ResourceAddress,
        predicate: Option<&str>,
        args: &[Value],
    ) -> GatewayResult<usize> {
        self.inner.delete_rows(address, predicate, args)
    }

    fn apply_batch(&self, operations: &[BatchOperation]) -> GatewayResult<Vec<BatchResult>> {
        self.batches.fetch_add(1, Ordering::SeqCst);

        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("gateway offline".to_string()));
        }

        self.inner.apply_batch(operations)
    }
}

fn unreliable_manager() -> (Arc<UnreliableBatchGateway>, Manager<Person>) {
    let inner = Arc::new(SqliteGateway::open_in_memory().unwrap());
    let gateway = Arc::new(UnreliableBatchGateway::new(Arc::clone(&inner)));
    let manager = Manager::new(
        person_schema(),
        AUTHORITY,
        Arc::clone(&gateway) as Arc<dyn StorageGateway>,
    )
    .unwrap();
    inner.register(manager.contract()).unwrap();

    (gateway, manager)
}

#[test]
fn replace_adds_updates_and_removes_in_one_pass() {
    let (_gateway, manager) = person_manager();

    let ada = manager.save(&Person::new("ada", 41)).unwrap().unwrap();
    let brian = manager.save(&Person::new("brian", 29)).unwrap().unwrap();

    let mut newer_ada = ada.clone();
    newer_ada.age = 42;
    newer_ada.version = ada.version + 1;

    // brian is absent from the target, so reconciliation removes him.
    let written = manager
        .replace(&[newer_ada.clone(), Person::new("carol", 35)])
        .unwrap();

    assert_eq!(written.len(), 2);

    let all = manager.all().unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|p| p.name == "ada" && p.age == 42));
    assert!(all.iter().any(|p| p.name == "carol"));
    assert!(!all.iter().any(|p| p.id == brian.id));
}

#[test]
fn replace_with_empty_target_clears_the_collection() {
    let (_gateway, manager) = person_manager();

    manager.save(&Person::new("ada", 41)).unwrap();
    manager.save(&Person::new("brian", 29)).unwrap();

    let written = manager.replace(&[]).unwrap();

    assert!(written.is_empty());
    assert!(manager.all().unwrap().is_empty());
}

#[test]
fn replaying_the_same_target_issues_no_operations() {
    let (gateway, manager) = unreliable_manager();

    manager.save(&Person::new("ada", 41)).unwrap();

    let target = manager.all().unwrap();
    let first = manager.replace(&target).unwrap();
    assert!(first.is_empty());

    // An empty plan short-circuits before the gateway sees a batch.
    assert_eq!(gateway.batches(), 0);
    assert_eq!(manager.all().unwrap(), target);
}

#[test]
fn replace_matching_only_reconciles_the_scoped_subset() {
    let (_gateway, manager) = person_manager();

    manager.save(&Person::new("ada", 41)).unwrap();
    let brian = manager.save(&Person::new("brian", 29)).unwrap().unwrap();
    manager.save(&Person::new("carol", 35)).unwrap();

    // Reconcile only the over-30 subset down to dora; brian is out of scope
    // and survives.
    let written = manager
        .replace_matching(&[Person::new("dora", 50)], "age > ?", &[Value::Integer(30)])
        .unwrap();

    assert_eq!(written.len(), 1);
    assert_eq!(written[0].name, "dora");

    let all = manager.all().unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|p| p.id == brian.id));
    assert!(all.iter().any(|p| p.name == "dora"));
}

#[test]
fn transport_failure_surfaces_as_reconciliation_failed_and_changes_nothing() {
    let (gateway, manager) = unreliable_manager();

    let before = vec![
        manager.save(&Person::new("ada", 41)).unwrap().unwrap(),
        manager.save(&Person::new("brian", 29)).unwrap().unwrap(),
    ];

    gateway.fail_batches();
    let err = manager.replace(&[Person::new("carol", 35)]).unwrap_err();

    assert!(matches!(
        err,
        ManagerError::ReconciliationFailed(GatewayError::Transport(_))
    ));
    assert_eq!(manager.all().unwrap(), before);
}

#[test]
fn replace_returns_the_post_write_state_of_written_records() {
    let (_gateway, manager) = person_manager();

    let ada = manager.save(&Person::new("ada", 41)).unwrap().unwrap();
    let mut newer_ada = ada.clone();
    newer_ada.age = 42;
    newer_ada.version = ada.version + 1;

    let written = manager
        .replace(&[newer_ada, Person::new("carol", 35)])
        .unwrap();

    // Every returned record carries a storage-assigned id and the version
    // actually stored.
    for person in &written {
        assert!(person.id.is_some());
    }
    let carol = written.iter().find(|p| p.name == "carol").unwrap();
    assert_eq!(carol.version, 1);
    let ada = written.iter().find(|p| p.name == "ada").unwrap();
    assert_eq!(ada.version, 2);
    assert_eq!(ada.age, 42);
}
