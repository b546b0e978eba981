//! Read-write conflict checker.
//!
//! Transactions never lock the objects they read. Instead every object a delete
//! targets is recorded as a [`ReadKey`]; at prepare the checker verifies that
//! none of them was dropped at or before the prepare timestamp. Deletes whose
//! targets were relocated by a merge are moved to the new objects before that
//! check runs.

use std::collections::BTreeSet;

use llkv_result::{Error, Result as LlkvResult};
use llkv_storage::{Storage, TableEntry};
use llkv_types::{DataKind, DbId, ObjectId, TableId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadKey {
    pub db: DbId,
    pub table: TableId,
    pub object: ObjectId,
    pub kind: DataKind,
}

impl ReadKey {
    pub fn data(table: &TableEntry, object: ObjectId) -> Self {
        Self {
            db: table.db(),
            table: table.id(),
            object,
            kind: DataKind::Data,
        }
    }
}

/// State of an object as seen at some timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Live,
    Dropped(Timestamp),
    Missing,
}

#[derive(Debug, Clone)]
pub struct RwChecker {
    start_ts: Timestamp,
    keys: BTreeSet<ReadKey>,
}

impl RwChecker {
    pub fn new(start_ts: Timestamp) -> Self {
        Self {
            start_ts,
            keys: BTreeSet::new(),
        }
    }

    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    pub fn insert(&mut self, key: ReadKey) -> bool {
        self.keys.insert(key)
    }

    pub fn delete(&mut self, key: &ReadKey) -> bool {
        self.keys.remove(key)
    }

    pub fn contains(&self, key: &ReadKey) -> bool {
        self.keys.contains(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ReadKey> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether `object` of `table` is still live at `ts`.
    pub fn liveness(table: &TableEntry, object: ObjectId, ts: Timestamp) -> Liveness {
        match table.get_object_by_id(object) {
            None => Liveness::Missing,
            Some(entry) => match entry.dropped_at {
                Some(dropped) if dropped <= ts => Liveness::Dropped(dropped),
                _ => Liveness::Live,
            },
        }
    }

    /// Validate one key at `ts`.
    ///
    /// Outside prepare the object must be visible at `ts`; at prepare it only has
    /// to be not dropped at or before `ts`.
    pub fn check_one(
        &self,
        storage: &Storage,
        key: &ReadKey,
        ts: Timestamp,
        is_prepare: bool,
    ) -> LlkvResult<()> {
        let table = storage.table(key.db, key.table).map_err(|_| {
            Error::ReadWriteConflict(format!(
                "table ({}, {}) no longer exists",
                key.db, key.table
            ))
        })?;
        let entry = table.get_object_by_id(key.object).ok_or_else(|| {
            Error::ReadWriteConflict(format!(
                "{} object {} is unknown to table '{}'",
                key.kind,
                key.object,
                table.name()
            ))
        })?;
        let ok = if is_prepare {
            !entry.dropped_by(ts)
        } else {
            entry.visible_by_ts(ts)
        };
        if ok {
            return Ok(());
        }
        tracing::debug!(
            "[RWCHECK] object {} of table '{}' failed at ts {ts} (created {}, dropped {:?}, prepare {is_prepare})",
            key.object,
            table.name(),
            entry.created_at,
            entry.dropped_at
        );
        Err(Error::ReadWriteConflict(format!(
            "{} object {} of table '{}' is not visible at ts {ts}",
            key.kind,
            key.object,
            table.name()
        )))
    }

    /// Validate every recorded key at the prepare timestamp.
    pub fn check(&self, storage: &Storage, prepare_ts: Timestamp) -> LlkvResult<()> {
        tracing::debug!(
            "[RWCHECK] validating {} keys at ts {prepare_ts}",
            self.keys.len()
        );
        for key in &self.keys {
            self.check_one(storage, key, prepare_ts, true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field, Schema};
    use llkv_storage::{ObjectEntry, ObjectOrigin, TableSchema};
    use std::sync::Arc;

    fn setup() -> (Storage, Arc<TableEntry>) {
        let storage = Storage::default();
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let table = storage
            .create_table(1, TableSchema::new("t", schema, 0).unwrap())
            .unwrap();
        table
            .create_object(ObjectEntry {
                id: ObjectId::new(9),
                kind: DataKind::Data,
                created_at: 10,
                dropped_at: None,
                origin: ObjectOrigin::Txn,
                open: false,
            })
            .unwrap();
        (storage, table)
    }

    #[test]
    fn test_prepare_check_tolerates_later_objects_only_until_drop() {
        let (storage, table) = setup();
        let mut checker = RwChecker::new(12);
        let key = ReadKey::data(&table, ObjectId::new(9));
        assert!(checker.insert(key));
        assert!(!checker.insert(key));

        checker.check_one(&storage, &key, 12, false).unwrap();
        assert!(checker.check_one(&storage, &key, 9, false).is_err());
        checker.check(&storage, 30).unwrap();

        table.soft_delete(ObjectId::new(9), 20).unwrap();
        checker.check(&storage, 19).unwrap();
        assert!(matches!(
            checker.check(&storage, 20),
            Err(Error::ReadWriteConflict(_))
        ));
        assert_eq!(
            RwChecker::liveness(&table, ObjectId::new(9), 25),
            Liveness::Dropped(20)
        );
        assert_eq!(
            RwChecker::liveness(&table, ObjectId::new(9), 15),
            Liveness::Live
        );

        assert!(checker.delete(&key));
        checker.check(&storage, 30).unwrap();
    }

    #[test]
    fn test_unknown_object_is_a_conflict() {
        let (storage, table) = setup();
        let checker = RwChecker::new(12);
        let key = ReadKey::data(&table, ObjectId::new(404));
        assert!(matches!(
            checker.check_one(&storage, &key, 12, true),
            Err(Error::ReadWriteConflict(_))
        ));
        assert_eq!(
            RwChecker::liveness(&table, ObjectId::new(404), 12),
            Liveness::Missing
        );
    }
}
