#![allow(dead_code)]

use std::sync::Arc;

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use llkv_storage::{ObjectEntry, StorageConfig, TableSchema};
use llkv_transaction::{Database, DatabaseConfig, TxnConfig};
use llkv_types::{DataKind, DbId, ObjectId, TableId, Timestamp};

pub const DB: DbId = 1;

/// Small blocks so multi-block paths are exercised.
pub fn config() -> DatabaseConfig {
    DatabaseConfig {
        storage: StorageConfig {
            block_max_rows: 4,
            appendable_object_max_rows: 64,
            ..StorageConfig::default()
        },
        txn: TxnConfig::default(),
    }
}

pub fn database() -> Arc<Database> {
    database_with(config())
}

pub fn database_with(config: DatabaseConfig) -> Arc<Database> {
    llkv_test_utils::init_tracing_for_tests();
    Database::new(config)
}

pub fn users(db: &Database) -> TableId {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
    ]));
    db.create_table(DB, TableSchema::new("users", schema, 0).unwrap())
        .unwrap()
}

pub fn named_rows(db: &Database, table: TableId, rows: &[(i64, &str)]) -> RecordBatch {
    let entry = db.storage().table(DB, table).unwrap();
    let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
    let names: Vec<&str> = rows.iter().map(|(_, name)| *name).collect();
    RecordBatch::try_new(
        Arc::clone(entry.schema().schema()),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(names)),
        ],
    )
    .unwrap()
}

pub fn rows(db: &Database, table: TableId, ids: &[i64]) -> RecordBatch {
    let names: Vec<String> = ids.iter().map(|id| format!("user-{id}")).collect();
    let pairs: Vec<(i64, &str)> = ids
        .iter()
        .zip(&names)
        .map(|(id, name)| (*id, name.as_str()))
        .collect();
    named_rows(db, table, &pairs)
}

/// Commit `ids` in one transaction at `ts`.
pub fn seed(db: &Arc<Database>, table: TableId, ids: &[i64], ts: Timestamp) {
    let mut txn = db.begin().unwrap();
    txn.append(DB, table, rows(db, table, ids)).unwrap();
    assert_eq!(txn.commit_at(ts).unwrap(), ts);
}

/// `(id, name)` of every row visible at `ts`, sorted by id.
pub fn visible(db: &Database, table: TableId, ts: Timestamp) -> Vec<(i64, String)> {
    let mut out = Vec::new();
    for scan in db.scan_at(DB, table, ts).unwrap() {
        let ids = scan
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        let names = scan
            .batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        for i in 0..scan.batch.num_rows() {
            out.push((ids.value(i), names.value(i).to_string()));
        }
    }
    out.sort();
    out
}

pub fn visible_ids(db: &Database, table: TableId, ts: Timestamp) -> Vec<i64> {
    visible(db, table, ts).into_iter().map(|(id, _)| id).collect()
}

pub fn objects(db: &Database, table: TableId, kind: DataKind) -> Vec<ObjectEntry> {
    db.storage().table(DB, table).unwrap().objects(kind)
}

pub fn data_object_ids(db: &Database, table: TableId) -> Vec<ObjectId> {
    objects(db, table, DataKind::Data)
        .into_iter()
        .map(|e| e.id)
        .collect()
}
