//! Table catalog with MVCC object lifetimes.
//!
//! Every object a table owns is recorded with the timestamp it became visible
//! (`created_at`) and, once compaction replaced it, the timestamp it stopped
//! being visible (`dropped_at`). Drops are soft: the entry stays so that
//! snapshots older than the drop keep reading the object and so that deletes can
//! detect that their target moved.

use std::sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicU32, Ordering},
};

use llkv_result::{Error, Result as LlkvResult};
use llkv_types::{DataKind, DbId, ObjectId, TableId, Timestamp};
use rustc_hash::FxHashMap;

use crate::schema::TableSchema;

/// How an object came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOrigin {
    /// Written by a transaction commit.
    Txn,
    /// Written by a merge; holds only rows already committed elsewhere.
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub id: ObjectId,
    pub kind: DataKind,
    pub created_at: Timestamp,
    pub dropped_at: Option<Timestamp>,
    pub origin: ObjectOrigin,
    /// Still accepting committed rows (appendable lineage).
    pub open: bool,
}

impl ObjectEntry {
    /// Visible to a read at `ts`.
    #[inline]
    pub fn visible_by_ts(&self, ts: Timestamp) -> bool {
        self.created_at <= ts && !self.dropped_by(ts)
    }

    /// Soft-deleted at or before `ts`.
    #[inline]
    pub fn dropped_by(&self, ts: Timestamp) -> bool {
        self.dropped_at.is_some_and(|d| d <= ts)
    }
}

#[derive(Debug, Default)]
struct ObjectList {
    entries: Vec<ObjectEntry>,
    index: FxHashMap<ObjectId, usize>,
}

/// Catalog entry of one table.
#[derive(Debug)]
pub struct TableEntry {
    db: DbId,
    id: TableId,
    schema: TableSchema,
    objects: RwLock<ObjectList>,
    open_objects: Mutex<FxHashMap<DataKind, ObjectId>>,
}

impl TableEntry {
    fn new(db: DbId, id: TableId, schema: TableSchema) -> Self {
        Self {
            db,
            id,
            schema,
            objects: RwLock::new(ObjectList::default()),
            open_objects: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn db(&self) -> DbId {
        self.db
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// Register a committed object.
    pub fn create_object(&self, entry: ObjectEntry) -> LlkvResult<()> {
        let mut list = self
            .objects
            .write()
            .expect("table objects write lock poisoned");
        if list.index.contains_key(&entry.id) {
            return Err(Error::CatalogError(format!(
                "object {} already registered in table '{}'",
                entry.id,
                self.name()
            )));
        }
        tracing::trace!(
            "[CATALOG] table '{}' registers {} object {} at ts {}",
            self.name(),
            entry.kind,
            entry.id,
            entry.created_at
        );
        let pos = list.entries.len();
        list.index.insert(entry.id, pos);
        list.entries.push(entry);
        Ok(())
    }

    pub fn get_object_by_id(&self, id: ObjectId) -> Option<ObjectEntry> {
        let list = self
            .objects
            .read()
            .expect("table objects read lock poisoned");
        list.index.get(&id).map(|&pos| list.entries[pos].clone())
    }

    /// Mark an object dropped as of `ts`.
    pub fn soft_delete(&self, id: ObjectId, ts: Timestamp) -> LlkvResult<()> {
        let mut list = self
            .objects
            .write()
            .expect("table objects write lock poisoned");
        let pos = *list.index.get(&id).ok_or(Error::NotFound)?;
        let entry = &mut list.entries[pos];
        if let Some(dropped) = entry.dropped_at {
            return Err(Error::WriteWriteConflict(format!(
                "object {id} was already dropped at {dropped}"
            )));
        }
        if ts < entry.created_at {
            return Err(Error::Internal(format!(
                "object {id} cannot be dropped at {ts} before its creation at {}",
                entry.created_at
            )));
        }
        entry.dropped_at = Some(ts);
        entry.open = false;
        let kind = entry.kind;
        drop(list);
        self.close_open_object(kind, id);
        Ok(())
    }

    /// All objects of `kind` in registration order, including dropped ones.
    pub fn objects(&self, kind: DataKind) -> Vec<ObjectEntry> {
        self.objects
            .read()
            .expect("table objects read lock poisoned")
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn visible_objects(&self, kind: DataKind, ts: Timestamp) -> Vec<ObjectEntry> {
        self.objects(kind)
            .into_iter()
            .filter(|e| e.visible_by_ts(ts))
            .collect()
    }

    /// The appendable object currently collecting committed rows of `kind`.
    pub fn open_object(&self, kind: DataKind) -> Option<ObjectId> {
        self.open_objects
            .lock()
            .expect("table open objects lock poisoned")
            .get(&kind)
            .copied()
    }

    pub fn set_open_object(&self, kind: DataKind, id: ObjectId) {
        self.open_objects
            .lock()
            .expect("table open objects lock poisoned")
            .insert(kind, id);
    }

    /// Stop routing appends to `id`; a no-op when another object is open.
    pub fn close_open_object(&self, kind: DataKind, id: ObjectId) {
        let mut open = self
            .open_objects
            .lock()
            .expect("table open objects lock poisoned");
        if open.get(&kind) == Some(&id) {
            open.remove(&kind);
        }
        drop(open);
        let mut list = self
            .objects
            .write()
            .expect("table objects write lock poisoned");
        if let Some(&pos) = list.index.get(&id) {
            list.entries[pos].open = false;
        }
    }
}

/// Registry of tables keyed by `(database, table)`.
#[derive(Debug)]
pub struct Catalog {
    next_table_id: AtomicU32,
    tables: RwLock<FxHashMap<(DbId, TableId), Arc<TableEntry>>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            next_table_id: AtomicU32::new(1),
            tables: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn create_table(&self, db: DbId, schema: TableSchema) -> LlkvResult<Arc<TableEntry>> {
        let mut tables = self
            .tables
            .write()
            .expect("catalog tables write lock poisoned");
        if tables
            .values()
            .any(|t| t.db == db && t.name() == schema.name())
        {
            return Err(Error::CatalogError(format!(
                "table '{}' already exists in database {db}",
                schema.name()
            )));
        }
        let id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
        let entry = Arc::new(TableEntry::new(db, id, schema));
        tables.insert((db, id), Arc::clone(&entry));
        tracing::debug!("[CATALOG] created table '{}' ({db}, {id})", entry.name());
        Ok(entry)
    }

    pub fn table(&self, db: DbId, table: TableId) -> LlkvResult<Arc<TableEntry>> {
        self.tables
            .read()
            .expect("catalog tables read lock poisoned")
            .get(&(db, table))
            .cloned()
            .ok_or_else(|| Error::CatalogError(format!("table ({db}, {table}) does not exist")))
    }
}
