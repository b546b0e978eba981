#![forbid(unsafe_code)]
//! Deletes that race a merge of the object they target.
//!
//! Covers:
//! - transferring a staged delete onto the merged row, over one or more hops
//! - evicted transfer pages surfacing as read-write conflicts
//! - the hop bound and rows dropped by the merge surfacing as write-write conflicts
//! - rewriting sealed staging objects that hold transferred tombstones
//! - commit-time dedup following rows a merge relocated
//! - commit-time dedup failing with a retryable conflict when a relocated row
//!   cannot be followed

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use llkv_result::Error;
use llkv_storage::PkValue;
use llkv_transaction::{Database, DatabaseConfig, Transaction, TxnConfig};
use llkv_types::{DataKind, ObjectId, RowIdentity, TableId};

fn key(id: i64) -> PkValue {
    PkValue::from(id)
}

fn merge(db: &Database, table: TableId, source: ObjectId, ts: u64) -> ObjectId {
    let outcome = db.merge_objects_at(DB, table, &[source], ts).unwrap();
    assert_eq!(outcome.dropped, vec![source]);
    outcome.created.unwrap()
}

#[test]
fn delete_follows_a_merge_committed_after_start() {
    let db = database();
    let users = users(&db);
    seed(&db, users, &[3, 7, 11], 10);
    let original = data_object_ids(&db, users)[0];

    let mut txn = db.begin_at(15).unwrap();
    let row = txn.delete_by_key(DB, users, &key(7)).unwrap();
    assert_eq!(row, RowIdentity::new(original, 0, 1));

    let merged = merge(&db, users, original, 20);
    assert_eq!(txn.commit_at(25).unwrap(), 25);

    let tombstones = db.scan_tombstones_at(DB, users, 25).unwrap();
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0].key, key(7));
    assert_eq!(tombstones[0].row, RowIdentity::new(merged, 0, 1));
    assert_eq!(tombstones[0].committed_at, 25);

    assert_eq!(visible_ids(&db, users, 25), vec![3, 11]);
    assert_eq!(visible_ids(&db, users, 20), vec![3, 7, 11]);
    // The resolver released its pin; the page lives on until its TTL.
    assert_eq!(db.storage().transfer_table().pin_count(original), Some(0));
}

#[test]
fn delete_follows_a_chain_of_merges() {
    let db = database();
    let users = users(&db);
    seed(&db, users, &[1, 2], 10);
    let a = data_object_ids(&db, users)[0];

    let mut txn = db.begin_at(15).unwrap();
    txn.delete_by_key(DB, users, &key(2)).unwrap();
    let b = merge(&db, users, a, 20);
    let c = merge(&db, users, b, 22);
    txn.commit_at(25).unwrap();

    let tombstones = db.scan_tombstones_at(DB, users, 25).unwrap();
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0].row, RowIdentity::new(c, 0, 1));
    assert_eq!(visible_ids(&db, users, 25), vec![1]);
    for object in [a, b] {
        assert_eq!(db.storage().transfer_table().pin_count(object), Some(0));
    }
}

#[test]
fn evicted_page_is_a_read_write_conflict() {
    let db = database();
    let users = users(&db);
    seed(&db, users, &[3, 7, 11], 10);
    let original = data_object_ids(&db, users)[0];

    let mut txn = db.begin_at(15).unwrap();
    txn.delete_by_key(DB, users, &key(7)).unwrap();
    merge(&db, users, original, 20);
    assert!(db.storage().transfer_table().evict(original));

    let err = txn.commit_at(25).unwrap_err();
    assert!(matches!(err, Error::ReadWriteConflict(_)), "{err:?}");
    assert!(err.is_retryable());
    assert!(db.scan_tombstones_at(DB, users, 25).unwrap().is_empty());
    assert_eq!(visible_ids(&db, users, 25), vec![3, 7, 11]);
}

#[test]
fn page_evicted_mid_chain_is_a_read_write_conflict() {
    let db = database();
    let users = users(&db);
    seed(&db, users, &[1, 2], 10);
    let a = data_object_ids(&db, users)[0];

    let mut txn = db.begin_at(15).unwrap();
    txn.delete_by_key(DB, users, &key(1)).unwrap();
    let b = merge(&db, users, a, 20);
    merge(&db, users, b, 22);
    assert!(db.storage().transfer_table().evict(b));

    assert!(matches!(
        txn.commit_at(25),
        Err(Error::ReadWriteConflict(_))
    ));
    // The first hop was pinned and released again.
    assert_eq!(db.storage().transfer_table().pin_count(a), Some(0));
    assert_eq!(db.storage().transfer_table().pin_count(b), None);
}

#[test]
fn expired_pages_are_a_read_write_conflict() {
    let db = database();
    let users = users(&db);
    seed(&db, users, &[1, 2], 10);
    let a = data_object_ids(&db, users)[0];

    let mut txn = db.begin_at(15).unwrap();
    txn.delete_by_key(DB, users, &key(2)).unwrap();
    merge(&db, users, a, 20);

    let transfers = db.storage().transfer_table();
    let later = Instant::now() + transfers.ttl() + Duration::from_secs(1);
    assert_eq!(transfers.evict_expired_at(later), 1);
    assert!(!transfers.contains(a));

    assert!(matches!(
        txn.commit_at(25),
        Err(Error::ReadWriteConflict(_))
    ));
}

#[test]
fn hop_bound_is_a_write_write_conflict() {
    let db = database_with(DatabaseConfig {
        txn: TxnConfig {
            max_transfer_hops: 1,
            ..TxnConfig::default()
        },
        ..config()
    });
    let users = users(&db);
    seed(&db, users, &[1, 2], 10);
    let a = data_object_ids(&db, users)[0];

    let mut txn = db.begin_at(15).unwrap();
    txn.delete_by_key(DB, users, &key(2)).unwrap();
    let b = merge(&db, users, a, 20);
    merge(&db, users, b, 22);

    let err = txn.commit_at(25).unwrap_err();
    assert!(matches!(err, Error::WriteWriteConflict(_)), "{err:?}");
}

#[test]
fn row_deleted_and_merged_away_is_a_write_write_conflict() {
    let db = database();
    let users = users(&db);
    seed(&db, users, &[1, 2, 3], 10);
    let a = data_object_ids(&db, users)[0];

    let mut loser = db.begin_at(15).unwrap();
    let mut winner = db.begin_at(15).unwrap();
    loser.delete_by_key(DB, users, &key(2)).unwrap();
    winner.delete_by_key(DB, users, &key(2)).unwrap();
    winner.commit_at(18).unwrap();

    let outcome = db.merge_objects_at(DB, users, &[a], 20).unwrap();
    assert_eq!(outcome.rows_removed, 1);
    assert_eq!(outcome.rows_kept, 2);

    let err = loser.commit_at(25).unwrap_err();
    assert!(matches!(err, Error::WriteWriteConflict(_)), "{err:?}");
    assert_eq!(visible_ids(&db, users, 25), vec![1, 3]);
}

#[test]
fn sealed_staged_tombstones_are_rewritten() {
    let db = database_with(DatabaseConfig {
        txn: TxnConfig {
            workspace_flush_rows: 2,
            ..TxnConfig::default()
        },
        ..config()
    });
    let users = users(&db);
    seed(&db, users, &[1, 2, 3, 4], 10);
    let sealed = data_object_ids(&db, users);
    assert_eq!(sealed.len(), 2);
    let (first, second) = (sealed[0], sealed[1]);

    let mut txn = db.begin_at(15).unwrap();
    txn.delete_by_key(DB, users, &key(1)).unwrap();
    txn.delete_by_key(DB, users, &key(3)).unwrap();
    let merged = merge(&db, users, first, 20);
    txn.commit_at(25).unwrap();

    assert_eq!(objects(&db, users, DataKind::Tombstone).len(), 1);
    let mut rows: Vec<_> = db
        .scan_tombstones_at(DB, users, 25)
        .unwrap()
        .into_iter()
        .map(|t| (t.key, t.row))
        .collect();
    rows.sort_by_key(|(_, row)| *row);
    let mut expected = vec![
        (key(1), RowIdentity::new(merged, 0, 0)),
        (key(3), RowIdentity::new(second, 0, 0)),
    ];
    expected.sort_by_key(|(_, row)| *row);
    assert_eq!(rows, expected);
    assert_eq!(visible_ids(&db, users, 25), vec![2, 4]);
}

#[test]
fn incremental_dedup_follows_merged_rows() {
    let db = database();
    let users = users(&db);

    let mut inserter = db.begin_at(15).unwrap();
    inserter.append(DB, users, rows(&db, users, &[5])).unwrap();

    // Committed after the inserter started, then merged away and deleted
    // under its new identity.
    let mut other = db.begin_at(15).unwrap();
    other.append(DB, users, rows(&db, users, &[5, 6])).unwrap();
    other.commit_at(17).unwrap();
    let a = data_object_ids(&db, users)[0];
    merge(&db, users, a, 20);
    let mut deleter = db.begin_at(21).unwrap();
    deleter.delete_by_key(DB, users, &key(5)).unwrap();
    deleter.commit_at(22).unwrap();

    assert_eq!(inserter.commit_at(30).unwrap(), 30);
    assert_eq!(visible_ids(&db, users, 30), vec![5, 6]);
}

#[test]
fn incremental_dedup_catches_merged_duplicates() {
    let db = database();
    let users = users(&db);

    let mut inserter = db.begin_at(15).unwrap();
    inserter.append(DB, users, rows(&db, users, &[5])).unwrap();

    let mut other = db.begin_at(15).unwrap();
    other.append(DB, users, rows(&db, users, &[5, 6])).unwrap();
    other.commit_at(17).unwrap();
    let a = data_object_ids(&db, users)[0];
    merge(&db, users, a, 20);

    let err = inserter.commit_at(30).unwrap_err();
    assert!(err.is_duplicate(), "{err:?}");
    assert_eq!(visible_ids(&db, users, 30), vec![5, 6]);
}

/// Inserter staged key 5 at 15; another transaction committed 5 and 6 at 17
/// into an object that was then merged at 20. Returns the inserter plus the
/// merged source and output objects.
fn merged_concurrent_insert(
    db: &Arc<Database>,
    users: TableId,
) -> (Transaction, ObjectId, ObjectId) {
    let mut inserter = db.begin_at(15).unwrap();
    inserter.append(DB, users, rows(db, users, &[5])).unwrap();

    let mut other = db.begin_at(15).unwrap();
    other.append(DB, users, rows(db, users, &[5, 6])).unwrap();
    other.commit_at(17).unwrap();
    let a = data_object_ids(db, users)[0];
    let b = merge(db, users, a, 20);
    (inserter, a, b)
}

#[test]
fn incremental_dedup_with_evicted_page_is_a_read_write_conflict() {
    let db = database();
    let users = users(&db);
    let (mut inserter, a, _) = merged_concurrent_insert(&db, users);
    let mut deleter = db.begin_at(21).unwrap();
    deleter.delete_by_key(DB, users, &key(5)).unwrap();
    deleter.commit_at(22).unwrap();
    assert!(db.storage().transfer_table().evict(a));

    let err = inserter.commit_at(30).unwrap_err();
    assert!(matches!(err, Error::ReadWriteConflict(_)), "{err:?}");
    assert!(err.is_retryable());
    assert_eq!(visible_ids(&db, users, 30), vec![6]);

    // A fresh attempt reads past the merge and finds the key free.
    let mut retry = db.begin().unwrap();
    retry.append(DB, users, rows(&db, users, &[5])).unwrap();
    retry.commit_at(31).unwrap();
    assert_eq!(visible_ids(&db, users, 31), vec![5, 6]);
}

#[test]
fn incremental_dedup_with_expired_page_is_a_read_write_conflict() {
    let db = database();
    let users = users(&db);
    let (mut inserter, a, _) = merged_concurrent_insert(&db, users);

    let transfers = db.storage().transfer_table();
    let later = Instant::now() + transfers.ttl() + Duration::from_secs(1);
    assert_eq!(transfers.evict_expired_at(later), 1);
    assert!(!transfers.contains(a));

    let err = inserter.commit_at(30).unwrap_err();
    assert!(matches!(err, Error::ReadWriteConflict(_)), "{err:?}");
    assert_eq!(visible_ids(&db, users, 30), vec![5, 6]);
}

#[test]
fn incremental_dedup_past_the_hop_bound_is_a_write_write_conflict() {
    let db = database_with(DatabaseConfig {
        txn: TxnConfig {
            max_transfer_hops: 1,
            ..TxnConfig::default()
        },
        ..config()
    });
    let users = users(&db);
    let (mut inserter, _, b) = merged_concurrent_insert(&db, users);
    merge(&db, users, b, 21);

    let err = inserter.commit_at(30).unwrap_err();
    assert!(matches!(err, Error::WriteWriteConflict(_)), "{err:?}");
    assert!(err.is_retryable());
    assert_eq!(visible_ids(&db, users, 30), vec![5, 6]);
}
