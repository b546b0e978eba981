//! Per-transaction staging areas.
//!
//! A [`TableSpace`] holds the uncommitted writes of one transaction to one
//! lineage (row data or tombstones) of one table: an in-memory batch plus the
//! statistics of every object already sealed out of it. Sealed staging objects
//! live in the object store but are not in the catalog until commit, so nobody
//! else can see them.

use arrow::array::BooleanArray;
use arrow::compute::{concat_batches, filter_record_batch};
use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result as LlkvResult};
use llkv_storage::constants::{TOMBSTONE_PK_COLUMN, TOMBSTONE_ROWID_COLUMN};
use llkv_storage::schema::{read_tombstones, row_identities};
use llkv_storage::{ObjectSpec, ObjectStats, ObjectStore, ObjectWriter, PkValue, ZoneMap, pk_values};
use llkv_types::{DataKind, RowIdentity};
use rustc_hash::FxHashSet;

/// A sealed staging object and the index of its create-object entry.
#[derive(Debug, Clone)]
pub struct SealedObject {
    pub stats: ObjectStats,
    pub entry: usize,
}

/// Where a staged tombstone currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedAt {
    /// Row position within the in-memory batch.
    Pending(usize),
    /// Index into [`TableSpace::sealed`].
    Sealed(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedTombstone {
    pub key: PkValue,
    pub row: RowIdentity,
    pub at: StagedAt,
}

#[derive(Debug)]
pub struct TableSpace {
    spec: ObjectSpec,
    flush_rows: usize,
    pending: Vec<RecordBatch>,
    pending_rows: usize,
    pending_keys: FxHashSet<PkValue>,
    /// First key staged twice without a workspace check.
    deferred_duplicate: Option<PkValue>,
    sealed: Vec<SealedObject>,
}

impl TableSpace {
    pub fn new(spec: ObjectSpec, flush_rows: usize) -> Self {
        Self {
            spec,
            flush_rows: flush_rows.max(1),
            pending: Vec::new(),
            pending_rows: 0,
            pending_keys: FxHashSet::default(),
            deferred_duplicate: None,
            sealed: Vec::new(),
        }
    }

    pub fn kind(&self) -> DataKind {
        self.spec.kind
    }

    pub fn spec(&self) -> &ObjectSpec {
        &self.spec
    }

    pub fn flush_rows(&self) -> usize {
        self.flush_rows
    }

    pub fn pending_rows(&self) -> usize {
        self.pending_rows
    }

    pub fn sealed(&self) -> &[SealedObject] {
        &self.sealed
    }

    pub fn sealed_rows(&self) -> usize {
        self.sealed.iter().map(|s| s.stats.rows).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_rows == 0 && self.sealed.is_empty()
    }

    pub fn deferred_duplicate(&self) -> Option<&PkValue> {
        self.deferred_duplicate.as_ref()
    }

    pub fn pending_contains(&self, key: &PkValue) -> bool {
        self.pending_keys.contains(key)
    }

    /// Add rows whose primary keys are `keys`.
    pub fn stage(&mut self, batch: RecordBatch, keys: Vec<PkValue>) {
        for key in keys {
            if let Some(dup) = self.pending_keys.replace(key)
                && self.deferred_duplicate.is_none()
            {
                self.deferred_duplicate = Some(dup);
            }
        }
        self.pending_rows += batch.num_rows();
        self.pending.push(batch);
    }

    pub fn should_seal(&self) -> bool {
        self.pending_rows >= self.flush_rows
    }

    /// Write the in-memory batch into sealed staging objects.
    ///
    /// The caller registers each returned object with [`TableSpace::add_sealed`].
    pub fn seal_pending(&mut self, store: &dyn ObjectStore) -> LlkvResult<Vec<ObjectStats>> {
        if self.pending_rows == 0 {
            return Ok(Vec::new());
        }
        let mut writer = ObjectWriter::new(store, self.spec.clone(), self.flush_rows)?;
        for batch in &self.pending {
            writer.write(batch)?;
        }
        let objects = writer.finish()?;
        self.reset_pending();
        Ok(objects)
    }

    pub fn add_sealed(&mut self, stats: ObjectStats, entry: usize) {
        self.sealed.push(SealedObject { stats, entry });
    }

    pub fn remove_sealed(&mut self, index: usize) -> SealedObject {
        self.sealed.remove(index)
    }

    pub fn pending_batch(&self) -> LlkvResult<Option<RecordBatch>> {
        if self.pending_rows == 0 {
            return Ok(None);
        }
        Ok(Some(concat_batches(&self.spec.schema, &self.pending)?))
    }

    /// Remove and return the in-memory batch.
    pub fn take_pending(&mut self) -> LlkvResult<Option<RecordBatch>> {
        let batch = self.pending_batch()?;
        self.reset_pending();
        Ok(batch)
    }

    /// Keep only the in-memory rows whose `keep` flag is set.
    pub fn retain_pending(&mut self, keep: &[bool]) -> LlkvResult<()> {
        let Some(batch) = self.pending_batch()? else {
            return Ok(());
        };
        if keep.len() != batch.num_rows() {
            return Err(Error::Internal(format!(
                "retain mask has {} flags for {} staged rows",
                keep.len(),
                batch.num_rows()
            )));
        }
        let kept = filter_record_batch(&batch, &BooleanArray::from(keep.to_vec()))?;
        let keys = pk_values(kept.column(self.spec.pk_index).as_ref())?;
        self.reset_pending();
        if kept.num_rows() > 0 {
            self.pending_keys.extend(keys);
            self.pending_rows = kept.num_rows();
            self.pending.push(kept);
        }
        Ok(())
    }

    fn reset_pending(&mut self) {
        self.pending.clear();
        self.pending_rows = 0;
        self.pending_keys.clear();
    }

    /// Every primary key held by a sealed staging object.
    pub fn object_keys(&self, store: &dyn ObjectStore, index: usize) -> LlkvResult<Vec<PkValue>> {
        let id = self.sealed[index].stats.id;
        let data = store.snapshot(id)?;
        let mut keys = Vec::with_capacity(data.row_count());
        for block in 0..data.block_count() as u32 {
            let columns = data.load_columns(block, &[data.pk_index()])?;
            keys.extend(pk_values(columns[0].as_ref())?);
        }
        Ok(keys)
    }

    /// First of `keys` already staged in the sealed objects from `sealed_from`
    /// on or, with `include_pending`, in the in-memory batch.
    ///
    /// Sealed objects are pruned by zonemap, then bloom filter, before their
    /// keys are loaded.
    pub fn find_staged(
        &self,
        store: &dyn ObjectStore,
        keys: &[PkValue],
        sealed_from: usize,
        include_pending: bool,
    ) -> LlkvResult<Option<PkValue>> {
        if keys.is_empty() {
            return Ok(None);
        }
        if include_pending && let Some(hit) = keys.iter().find(|k| self.pending_keys.contains(*k)) {
            return Ok(Some(hit.clone()));
        }
        let probe = ZoneMap::from_values(keys);
        for index in sealed_from..self.sealed.len() {
            let stats = &self.sealed[index].stats;
            if !stats.zonemap.intersects(&probe) {
                continue;
            }
            let candidates: Vec<&PkValue> = keys.iter().filter(|k| stats.may_contain(k)).collect();
            if candidates.is_empty() {
                continue;
            }
            let held: FxHashSet<PkValue> = self.object_keys(store, index)?.into_iter().collect();
            if let Some(hit) = candidates.into_iter().find(|k| held.contains(*k)) {
                return Ok(Some(hit.clone()));
            }
        }
        Ok(None)
    }

    /// A key staged twice across the sealed objects and the in-memory batch.
    pub fn source_duplicate(&self, store: &dyn ObjectStore) -> LlkvResult<Option<PkValue>> {
        if let Some(dup) = &self.deferred_duplicate {
            return Ok(Some(dup.clone()));
        }
        for index in 0..self.sealed.len() {
            let keys = self.object_keys(store, index)?;
            if let Some(dup) = self.find_staged(store, &keys, index + 1, true)? {
                return Ok(Some(dup));
            }
        }
        Ok(None)
    }

    /// Every staged primary key.
    pub fn staged_keys(&self, store: &dyn ObjectStore) -> LlkvResult<Vec<PkValue>> {
        let mut keys = Vec::with_capacity(self.sealed_rows() + self.pending_rows);
        for index in 0..self.sealed.len() {
            keys.extend(self.object_keys(store, index)?);
        }
        for batch in &self.pending {
            keys.extend(pk_values(batch.column(self.spec.pk_index).as_ref())?);
        }
        Ok(keys)
    }

    /// Every staged tombstone, sealed objects first.
    pub fn tombstones(&self, store: &dyn ObjectStore) -> LlkvResult<Vec<StagedTombstone>> {
        if self.spec.kind != DataKind::Tombstone {
            return Err(Error::Internal(format!(
                "{} staging area holds no tombstones",
                self.spec.kind
            )));
        }
        let mut out = Vec::with_capacity(self.sealed_rows() + self.pending_rows);
        for (index, sealed) in self.sealed.iter().enumerate() {
            let data = store.snapshot(sealed.stats.id)?;
            for block in 0..data.block_count() as u32 {
                let columns =
                    data.load_columns(block, &[TOMBSTONE_PK_COLUMN, TOMBSTONE_ROWID_COLUMN])?;
                let keys = pk_values(columns[0].as_ref())?;
                let rows = row_identities(columns[1].as_ref())?;
                out.extend(keys.into_iter().zip(rows).map(|(key, row)| StagedTombstone {
                    key,
                    row,
                    at: StagedAt::Sealed(index),
                }));
            }
        }
        let mut position = 0;
        for batch in &self.pending {
            let (keys, rows) = read_tombstones(batch)?;
            for (key, row) in keys.into_iter().zip(rows) {
                out.push(StagedTombstone {
                    key,
                    row,
                    at: StagedAt::Pending(position),
                });
                position += 1;
            }
        }
        Ok(out)
    }

    pub fn clear(&mut self) {
        self.reset_pending();
        self.deferred_duplicate = None;
        self.sealed.clear();
    }
}
