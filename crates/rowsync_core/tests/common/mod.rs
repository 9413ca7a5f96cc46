#![allow(dead_code)]

use rowsync_core::{
    ColumnBinding, Manager, Record, Schema, SqliteGateway, StorageGateway, StorageType, Value,
};
use std::sync::Arc;

pub const AUTHORITY: &str = "app.data";

/// Locally-authored fixture: storage assigns ids and manages versions.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: Option<i64>,
    pub version: i64,
    pub name: String,
    pub age: i32,
}

impl Person {
    pub fn new(name: &str, age: i32) -> Self {
        Self {
            id: None,
            version: 1,
            name: name.to_string(),
            age,
        }
    }
}

impl Record for Person {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: Option<i64>) {
        self.id = id;
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

fn read_name(person: &Person) -> Value {
    Value::Text(person.name.clone())
}

fn write_name(person: &mut Person, value: Value) {
    if let Some(text) = value.as_text() {
        person.name = text.to_string();
    }
}

fn read_age(person: &Person) -> Value {
    Value::Integer(person.age)
}

fn write_age(person: &mut Person, value: Value) {
    if let Some(age) = value.as_integer() {
        person.age = age;
    }
}

fn construct_person(id: Option<i64>, version: i64) -> Person {
    Person {
        id,
        version,
        name: String::new(),
        age: 0,
    }
}

const PERSON_COLUMNS: &[ColumnBinding<Person>] = &[
    ColumnBinding {
        name: "name",
        storage: StorageType::Text,
        read: read_name,
        write: write_name,
    },
    ColumnBinding {
        name: "age",
        storage: StorageType::Integer,
        read: read_age,
        write: write_age,
    },
];

pub fn person_schema() -> Schema<Person> {
    Schema {
        table: "people",
        columns: PERSON_COLUMNS,
        construct: construct_person,
    }
}

/// Remotely-authored fixture: ids and versions come from an external
/// system of record.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: Option<i64>,
    pub version: i64,
    pub serial: String,
}

impl Device {
    pub fn new(id: i64, version: i64, serial: &str) -> Self {
        Self {
            id: Some(id),
            version,
            serial: serial.to_string(),
        }
    }
}

impl Record for Device {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: Option<i64>) {
        self.id = id;
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn id_managed_externally(&self) -> bool {
        true
    }

    fn version_managed_externally(&self) -> bool {
        true
    }
}

fn read_serial(device: &Device) -> Value {
    Value::Text(device.serial.clone())
}

fn write_serial(device: &mut Device, value: Value) {
    if let Some(text) = value.as_text() {
        device.serial = text.to_string();
    }
}

fn construct_device(id: Option<i64>, version: i64) -> Device {
    Device {
        id,
        version,
        serial: String::new(),
    }
}

const DEVICE_COLUMNS: &[ColumnBinding<Device>] = &[ColumnBinding {
    name: "serial",
    storage: StorageType::Text,
    read: read_serial,
    write: write_serial,
}];

pub fn device_schema() -> Schema<Device> {
    Schema {
        table: "devices",
        columns: DEVICE_COLUMNS,
        construct: construct_device,
    }
}

pub fn person_manager() -> (Arc<SqliteGateway>, Manager<Person>) {
    let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
    let manager = Manager::new(
        person_schema(),
        AUTHORITY,
        Arc::clone(&gateway) as Arc<dyn StorageGateway>,
    )
    .unwrap();
    gateway.register(manager.contract()).unwrap();

    (gateway, manager)
}

pub fn device_manager() -> (Arc<SqliteGateway>, Manager<Device>) {
    let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
    let manager = Manager::new(
        device_schema(),
        AUTHORITY,
        Arc::clone(&gateway) as Arc<dyn StorageGateway>,
    )
    .unwrap();
    gateway.register(manager.contract()).unwrap();

    (gateway, manager)
}
