#![forbid(unsafe_code)]

//! Visibility probes and merges over committed objects.
//!
//! Covers:
//! - per-row timestamps of the appendable lineage
//! - snapshot and committed-window primary key lookups
//! - tombstone windows in `find_deletes`
//! - merges: delete filtering, sort order, transfer pages, object lifetimes

use std::sync::Arc;

use arrow::array::{Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use llkv_result::Error;
use llkv_storage::{
    ObjectOrigin, PkValue, ScanWindow, Storage, StorageConfig, TableEntry, TableSchema,
    find_deletes, find_pk_rows, merge_objects, scan_tombstones, scan_visible,
};
use llkv_test_utils::init_tracing_for_tests;
use llkv_types::{DataKind, RowIdentity};
use rustc_hash::FxHashSet;

/// Storage with tiny blocks so multi-block paths are exercised.
fn storage() -> Storage {
    init_tracing_for_tests();
    Storage::new(StorageConfig {
        block_max_rows: 4,
        appendable_object_max_rows: 10,
        ..StorageConfig::default()
    })
}

fn users(storage: &Storage) -> Arc<TableEntry> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
    ]));
    storage
        .create_table(1, TableSchema::new("users", schema, 0).unwrap())
        .unwrap()
}

fn rows(table: &TableEntry, ids: &[i64]) -> RecordBatch {
    let names: Vec<String> = ids.iter().map(|id| format!("user-{id}")).collect();
    RecordBatch::try_new(
        Arc::clone(table.schema().schema()),
        vec![
            Arc::new(Int64Array::from(ids.to_vec())),
            Arc::new(StringArray::from(names)),
        ],
    )
    .unwrap()
}

fn keys(ids: &[i64]) -> Vec<PkValue> {
    ids.iter().copied().map(PkValue::Int).collect()
}

/// Primary keys visible at `ts`, sorted.
fn visible_ids(storage: &Storage, table: &TableEntry, ts: u64) -> Vec<i64> {
    let mut out = Vec::new();
    for batch in scan_visible(storage, table, ts, &FxHashSet::default()).unwrap() {
        let ids = batch
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        out.extend(ids.values().iter().copied());
    }
    out.sort_unstable();
    out
}

fn delete(storage: &Storage, table: &TableEntry, ids: &[i64], ts: u64) -> Vec<RowIdentity> {
    let found = find_pk_rows(storage, table, &keys(ids), ScanWindow::Snapshot(ts)).unwrap();
    let targets: Vec<RowIdentity> = found.iter().map(|m| m.row).collect();
    let found_keys: Vec<PkValue> = found.iter().map(|m| PkValue::Int(ids[m.key_index])).collect();
    let batch = table.schema().tombstone_batch(&found_keys, &targets).unwrap();
    storage
        .append_committed(table, DataKind::Tombstone, &batch, ts)
        .unwrap();
    targets
}

#[test]
fn appendable_rows_become_visible_at_their_commit_ts() {
    let storage = storage();
    let table = users(&storage);
    storage
        .append_committed(&table, DataKind::Data, &rows(&table, &[1, 2, 3]), 10)
        .unwrap();
    storage
        .append_committed(&table, DataKind::Data, &rows(&table, &[4, 5]), 12)
        .unwrap();

    assert!(visible_ids(&storage, &table, 9).is_empty());
    assert_eq!(visible_ids(&storage, &table, 10), vec![1, 2, 3]);
    assert_eq!(visible_ids(&storage, &table, 12), vec![1, 2, 3, 4, 5]);

    // Both commits share one appendable object.
    assert_eq!(table.objects(DataKind::Data).len(), 1);
}

#[test]
fn appendable_object_rolls_over_when_full() {
    let storage = storage();
    let table = users(&storage);
    let ids: Vec<i64> = (0..23).collect();
    storage
        .append_committed(&table, DataKind::Data, &rows(&table, &ids), 10)
        .unwrap();

    let objects = table.objects(DataKind::Data);
    assert_eq!(objects.len(), 3);
    assert!(!objects[0].open);
    assert!(!objects[1].open);
    assert!(objects[2].open);
    assert!(storage.store().snapshot(objects[0].id).unwrap().is_sealed());
    assert_eq!(visible_ids(&storage, &table, 10), ids);
}

#[test]
fn committed_window_sees_only_rows_inside_it() {
    let storage = storage();
    let table = users(&storage);
    storage
        .append_committed(&table, DataKind::Data, &rows(&table, &[1]), 10)
        .unwrap();
    storage
        .append_committed(&table, DataKind::Data, &rows(&table, &[2]), 15)
        .unwrap();

    let probe = keys(&[1, 2]);
    let window = ScanWindow::Committed { from: 11, to: 20 };
    let found = find_pk_rows(&storage, &table, &probe, window).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key_index, 1);

    let snapshot = find_pk_rows(&storage, &table, &probe, ScanWindow::Snapshot(12)).unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].key_index, 0);
}

#[test]
fn tombstone_is_visible_only_inside_its_window() {
    let storage = storage();
    let table = users(&storage);
    storage
        .append_committed(&table, DataKind::Data, &rows(&table, &[7, 8]), 10)
        .unwrap();
    let targets = delete(&storage, &table, &[7], 20);
    let probe = keys(&[7]);

    assert!(find_deletes(&storage, &table, &probe, &targets, 0, 19).unwrap().is_empty());
    assert!(find_deletes(&storage, &table, &probe, &targets, 0, 20).unwrap().contains(0));
    assert!(find_deletes(&storage, &table, &probe, &targets, 21, 30).unwrap().is_empty());

    assert_eq!(visible_ids(&storage, &table, 19), vec![7, 8]);
    assert_eq!(visible_ids(&storage, &table, 20), vec![8]);

    let tombstones = scan_tombstones(&storage, &table, 30).unwrap();
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0].row, targets[0]);
    assert_eq!(tombstones[0].committed_at, 20);
}

#[test]
fn merge_drops_deleted_rows_and_publishes_transfer_pages() {
    let storage = storage();
    let table = users(&storage);
    storage
        .append_committed(&table, DataKind::Data, &rows(&table, &[9, 3, 5, 1]), 10)
        .unwrap();
    let source = table.objects(DataKind::Data)[0].id;
    let deleted = delete(&storage, &table, &[5], 12);
    let survivor = find_pk_rows(&storage, &table, &keys(&[9]), ScanWindow::Snapshot(12))
        .unwrap()[0]
        .row;

    let outcome = merge_objects(&storage, &table, &[source], 20).unwrap();
    let merged = outcome.created.unwrap();
    assert_eq!(outcome.rows_kept, 3);
    assert_eq!(outcome.rows_removed, 1);

    let old = table.get_object_by_id(source).unwrap();
    assert_eq!(old.dropped_at, Some(20));
    let new = table.get_object_by_id(merged).unwrap();
    assert_eq!(new.origin, ObjectOrigin::Merge);
    assert_eq!(new.created_at, 20);

    let page = storage.transfer_table().pin(source).unwrap();
    assert_eq!(page.transfer(&deleted[0]), None);
    let moved = page.transfer(&survivor).unwrap();
    assert_eq!(moved.object, merged);
    // Sorted output: 1, 3, 9 → key 9 is the third row.
    assert_eq!((moved.block, moved.offset), (0, 2));
    drop(page);

    assert_eq!(visible_ids(&storage, &table, 19), vec![1, 3, 9]);
    assert_eq!(visible_ids(&storage, &table, 20), vec![1, 3, 9]);
    assert!(merge_objects(&storage, &table, &[source], 21).is_err());
}

#[test]
fn merged_objects_are_outside_committed_windows() {
    let storage = storage();
    let table = users(&storage);
    storage
        .append_committed(&table, DataKind::Data, &rows(&table, &[1]), 10)
        .unwrap();
    let source = table.objects(DataKind::Data)[0].id;
    merge_objects(&storage, &table, &[source], 20).unwrap();

    // The merge output is newly created at 20 but holds a row committed at 10.
    let window = ScanWindow::Committed { from: 15, to: 25 };
    assert!(find_pk_rows(&storage, &table, &keys(&[1]), window).unwrap().is_empty());
    let window = ScanWindow::Committed { from: 5, to: 25 };
    assert_eq!(find_pk_rows(&storage, &table, &keys(&[1]), window).unwrap().len(), 1);
}

#[test]
fn merge_rejects_bad_sources() {
    let storage = storage();
    let table = users(&storage);
    storage
        .append_committed(&table, DataKind::Data, &rows(&table, &[1]), 10)
        .unwrap();
    let source = table.objects(DataKind::Data)[0].id;
    assert!(matches!(
        merge_objects(&storage, &table, &[], 20),
        Err(Error::InvalidArgumentError(_))
    ));
    assert!(matches!(
        merge_objects(&storage, &table, &[source, source], 20),
        Err(Error::InvalidArgumentError(_))
    ));
    assert!(matches!(
        merge_objects(&storage, &table, &[source], 5),
        Err(Error::InvalidArgumentError(_))
    ));
}

#[test]
fn string_keys_prune_and_match() {
    let storage = storage();
    let schema = Arc::new(Schema::new(vec![Field::new("code", DataType::Utf8, false)]));
    let table = storage
        .create_table(1, TableSchema::new("codes", schema, 0).unwrap())
        .unwrap();
    let batch = RecordBatch::try_new(
        Arc::clone(table.schema().schema()),
        vec![Arc::new(StringArray::from(vec!["b", "d", "f"]))],
    )
    .unwrap();
    storage
        .append_committed(&table, DataKind::Data, &batch, 3)
        .unwrap();
    let probe = vec![PkValue::from("d"), PkValue::from("z")];
    let found = find_pk_rows(&storage, &table, &probe, ScanWindow::Snapshot(3)).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key_index, 0);
    assert_eq!(
        scan_visible(&storage, &table, 3, &FxHashSet::default()).unwrap()[0]
            .batch
            .column(0)
            .len(),
        3
    );
}
