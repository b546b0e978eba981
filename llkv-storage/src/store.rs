//! Object store contract and the in-memory implementation.

use std::sync::{
    Arc, RwLock,
    atomic::{AtomicU64, Ordering},
};

use arrow::array::ArrayRef;
use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result as LlkvResult};
use llkv_types::{ObjectId, Timestamp};
use rustc_hash::FxHashMap;

use crate::object::{ObjectData, ObjectSpec, ObjectStats};

/// Storage for versioned columnar objects.
///
/// Objects are created empty, filled with [`ObjectStore::append`] and frozen with
/// [`ObjectStore::seal`]. Readers take [`ObjectStore::snapshot`]s; a snapshot is
/// never affected by later appends to the same object.
pub trait ObjectStore: Send + Sync + 'static {
    fn create_object(&self, spec: ObjectSpec) -> LlkvResult<ObjectId>;

    /// Append rows; `commit_ts` stamps every row of objects that track row timestamps.
    fn append(
        &self,
        id: ObjectId,
        batch: &RecordBatch,
        commit_ts: Option<Timestamp>,
    ) -> LlkvResult<usize>;

    fn seal(&self, id: ObjectId) -> LlkvResult<ObjectStats>;

    fn snapshot(&self, id: ObjectId) -> LlkvResult<Arc<ObjectData>>;

    fn remove(&self, id: ObjectId) -> LlkvResult<()>;

    fn contains(&self, id: ObjectId) -> bool;

    fn load_columns(
        &self,
        id: ObjectId,
        block: u32,
        columns: &[usize],
    ) -> LlkvResult<Vec<ArrayRef>> {
        self.snapshot(id)?.load_columns(block, columns)
    }

    fn stats(&self, id: ObjectId) -> LlkvResult<ObjectStats> {
        Ok(self.snapshot(id)?.stats())
    }
}

/// In-memory object store.
///
/// Appends are copy-on-write: a writer clones the object only while a reader
/// still holds a snapshot of it.
pub struct MemObjectStore {
    next_id: AtomicU64,
    objects: RwLock<FxHashMap<ObjectId, Arc<ObjectData>>>,
}

impl Default for MemObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemObjectStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            objects: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects
            .read()
            .expect("MemObjectStore objects read lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn alloc_id(&self) -> LlkvResult<ObjectId> {
        let seq = self
            .next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| cur.checked_add(1))
            .map_err(|_| Error::Internal("object id space overflow".to_string()))?;
        Ok(ObjectId::new(seq as u128))
    }

    fn missing(id: ObjectId) -> Error {
        Error::Internal(format!("object {id} not found in store"))
    }
}

impl ObjectStore for MemObjectStore {
    fn create_object(&self, spec: ObjectSpec) -> LlkvResult<ObjectId> {
        let id = self.alloc_id()?;
        let data = ObjectData::new(id, spec)?;
        self.objects
            .write()
            .expect("MemObjectStore objects write lock poisoned")
            .insert(id, Arc::new(data));
        Ok(id)
    }

    fn append(
        &self,
        id: ObjectId,
        batch: &RecordBatch,
        commit_ts: Option<Timestamp>,
    ) -> LlkvResult<usize> {
        let mut map = self
            .objects
            .write()
            .expect("MemObjectStore objects write lock poisoned");
        let data = map.get_mut(&id).ok_or_else(|| Self::missing(id))?;
        Arc::make_mut(data).append(batch, commit_ts)
    }

    fn seal(&self, id: ObjectId) -> LlkvResult<ObjectStats> {
        let mut map = self
            .objects
            .write()
            .expect("MemObjectStore objects write lock poisoned");
        let data = map.get_mut(&id).ok_or_else(|| Self::missing(id))?;
        if data.is_sealed() {
            return Ok(data.stats());
        }
        Arc::make_mut(data).seal()
    }

    fn snapshot(&self, id: ObjectId) -> LlkvResult<Arc<ObjectData>> {
        self.objects
            .read()
            .expect("MemObjectStore objects read lock poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| Self::missing(id))
    }

    fn remove(&self, id: ObjectId) -> LlkvResult<()> {
        self.objects
            .write()
            .expect("MemObjectStore objects write lock poisoned")
            .remove(&id);
        Ok(())
    }

    fn contains(&self, id: ObjectId) -> bool {
        self.objects
            .read()
            .expect("MemObjectStore objects read lock poisoned")
            .contains_key(&id)
    }
}
