//! In-memory representation of a versioned columnar object.
//!
//! An object is a sequence of blocks (Arrow record batches of at most
//! `block_max_rows` rows) plus pruning statistics: one zonemap per block and,
//! once sealed, a bloom filter over every primary key. Objects in the
//! appendable lineage also carry one commit timestamp per row.

use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result as LlkvResult};
use llkv_types::{DataKind, ObjectId, Timestamp};

use crate::bloom::KeyBloom;
use crate::keys::{PkValue, pk_values};
use crate::zonemap::ZoneMap;

/// Creation parameters of an object.
#[derive(Debug, Clone)]
pub struct ObjectSpec {
    pub kind: DataKind,
    pub schema: SchemaRef,
    pub pk_index: usize,
    pub block_max_rows: usize,
    /// Record a commit timestamp for every appended row.
    pub track_row_ts: bool,
}

/// Statistics retained for an object once its rows are no longer in memory.
///
/// Staging areas keep only this descriptor for the objects they seal.
#[derive(Debug, Clone)]
pub struct ObjectStats {
    pub id: ObjectId,
    pub kind: DataKind,
    pub rows: usize,
    pub zonemap: ZoneMap,
    pub block_zonemaps: Vec<ZoneMap>,
    pub bloom: Option<Arc<KeyBloom>>,
}

impl ObjectStats {
    /// Cheap negative check: `false` means `key` is definitely not in the object.
    pub fn may_contain(&self, key: &PkValue) -> bool {
        self.zonemap.contains(key) && self.bloom.as_ref().is_none_or(|b| b.may_contain(key))
    }
}

#[derive(Debug, Clone)]
pub struct ObjectData {
    id: ObjectId,
    spec: ObjectSpec,
    blocks: Vec<RecordBatch>,
    zonemaps: Vec<ZoneMap>,
    bloom: Option<Arc<KeyBloom>>,
    row_ts: Vec<Timestamp>,
    rows: usize,
    sealed: bool,
}

impl ObjectData {
    pub fn new(id: ObjectId, spec: ObjectSpec) -> LlkvResult<Self> {
        if spec.block_max_rows == 0 {
            return Err(Error::InvalidArgumentError(
                "block_max_rows must be positive".into(),
            ));
        }
        if spec.pk_index >= spec.schema.fields().len() {
            return Err(Error::InvalidArgumentError(format!(
                "primary key index {} out of range",
                spec.pk_index
            )));
        }
        Ok(Self {
            id,
            spec,
            blocks: Vec::new(),
            zonemaps: Vec::new(),
            bloom: None,
            row_ts: Vec::new(),
            rows: 0,
            sealed: false,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> DataKind {
        self.spec.kind
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.spec.schema
    }

    pub fn pk_index(&self) -> usize {
        self.spec.pk_index
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn tracks_row_ts(&self) -> bool {
        self.spec.track_row_ts
    }

    pub fn block(&self, block: u32) -> LlkvResult<&RecordBatch> {
        self.blocks.get(block as usize).ok_or_else(|| {
            Error::Internal(format!("object {} has no block {}", self.id, block))
        })
    }

    pub fn block_zonemap(&self, block: u32) -> Option<&ZoneMap> {
        self.zonemaps.get(block as usize)
    }

    /// Zonemap over every block.
    pub fn zonemap(&self) -> ZoneMap {
        let mut zm = ZoneMap::empty();
        for block in &self.zonemaps {
            zm.merge(block);
        }
        zm
    }

    pub fn bloom(&self) -> Option<&Arc<KeyBloom>> {
        self.bloom.as_ref()
    }

    /// Bloom check when sealed; unsealed objects answer "maybe".
    pub fn may_contain(&self, key: &PkValue) -> bool {
        self.bloom.as_ref().is_none_or(|b| b.may_contain(key))
    }

    /// Commit timestamp of a row in an appendable-lineage object.
    pub fn row_ts(&self, block: u32, offset: u32) -> Option<Timestamp> {
        if !self.spec.track_row_ts {
            return None;
        }
        let idx = block as usize * self.spec.block_max_rows + offset as usize;
        self.row_ts.get(idx).copied()
    }

    /// Commit timestamps of every row of `block`, when tracked.
    pub fn block_row_ts(&self, block: u32) -> Option<&[Timestamp]> {
        if !self.spec.track_row_ts {
            return None;
        }
        let start = block as usize * self.spec.block_max_rows;
        let len = self.blocks.get(block as usize)?.num_rows();
        self.row_ts.get(start..start + len)
    }

    pub fn max_row_ts(&self) -> Option<Timestamp> {
        self.row_ts.last().copied()
    }

    pub fn load_columns(&self, block: u32, columns: &[usize]) -> LlkvResult<Vec<ArrayRef>> {
        let batch = self.block(block)?;
        columns
            .iter()
            .map(|&c| {
                if c < batch.num_columns() {
                    Ok(Arc::clone(batch.column(c)))
                } else {
                    Err(Error::InvalidArgumentError(format!(
                        "object {} has no column {}",
                        self.id, c
                    )))
                }
            })
            .collect()
    }

    pub fn stats(&self) -> ObjectStats {
        ObjectStats {
            id: self.id,
            kind: self.spec.kind,
            rows: self.rows,
            zonemap: self.zonemap(),
            block_zonemaps: self.zonemaps.clone(),
            bloom: self.bloom.clone(),
        }
    }

    /// Append rows, filling the last block before starting a new one.
    pub fn append(&mut self, batch: &RecordBatch, commit_ts: Option<Timestamp>) -> LlkvResult<usize> {
        if self.sealed {
            return Err(Error::InvalidArgumentError(format!(
                "object {} is sealed",
                self.id
            )));
        }
        if self.spec.track_row_ts && commit_ts.is_none() {
            return Err(Error::Internal(format!(
                "object {} tracks row timestamps but no commit timestamp was given",
                self.id
            )));
        }
        let batch = RecordBatch::try_new(Arc::clone(&self.spec.schema), batch.columns().to_vec())?;
        let total = batch.num_rows();
        let block_max = self.spec.block_max_rows;
        let mut offset = 0;
        while offset < total {
            let room = match self.blocks.last() {
                Some(last) if last.num_rows() < block_max => block_max - last.num_rows(),
                _ => {
                    self.blocks
                        .push(RecordBatch::new_empty(Arc::clone(&self.spec.schema)));
                    self.zonemaps.push(ZoneMap::empty());
                    block_max
                }
            };
            let take = room.min(total - offset);
            let slice = batch.slice(offset, take);
            let keys = pk_values(slice.column(self.spec.pk_index).as_ref())?;

            let last = self.blocks.len() - 1;
            let merged = concat_batches(&self.spec.schema, [&self.blocks[last], &slice])?;
            self.blocks[last] = merged;
            for key in &keys {
                self.zonemaps[last].update(key);
            }
            if self.spec.track_row_ts
                && let Some(ts) = commit_ts
            {
                self.row_ts.extend(std::iter::repeat_n(ts, take));
            }
            offset += take;
        }
        self.rows += total;
        Ok(total)
    }

    /// Freeze the object and build its bloom filter. Idempotent.
    pub fn seal(&mut self) -> LlkvResult<ObjectStats> {
        if !self.sealed {
            let mut keys = Vec::with_capacity(self.rows);
            for block in &self.blocks {
                keys.extend(pk_values(block.column(self.spec.pk_index).as_ref())?);
            }
            self.bloom = Some(Arc::new(KeyBloom::from_values(&keys)));
            self.sealed = true;
        }
        Ok(self.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};

    fn spec(block_max_rows: usize, track_row_ts: bool) -> ObjectSpec {
        ObjectSpec {
            kind: DataKind::Data,
            schema: Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)])),
            pk_index: 0,
            block_max_rows,
            track_row_ts,
        }
    }

    fn ids(spec: &ObjectSpec, values: Vec<i64>) -> RecordBatch {
        RecordBatch::try_new(
            Arc::clone(&spec.schema),
            vec![Arc::new(Int64Array::from(values))],
        )
        .unwrap()
    }

    #[test]
    fn test_append_splits_blocks_and_tracks_zonemaps() {
        let spec = spec(3, false);
        let mut object = ObjectData::new(ObjectId::new(1), spec.clone()).unwrap();
        object.append(&ids(&spec, vec![5, 1, 9, 4]), None).unwrap();
        object.append(&ids(&spec, vec![2, 8]), None).unwrap();

        assert_eq!(object.row_count(), 6);
        assert_eq!(object.block_count(), 2);
        assert_eq!(object.block(0).unwrap().num_rows(), 3);
        assert_eq!(object.block(1).unwrap().num_rows(), 3);
        let zm = object.block_zonemap(1).unwrap();
        assert_eq!(zm.min(), Some(&PkValue::Int(2)));
        assert_eq!(zm.max(), Some(&PkValue::Int(8)));
        assert!(object.may_contain(&PkValue::Int(100)));
    }

    #[test]
    fn test_seal_builds_bloom_and_rejects_appends() {
        let spec = spec(4, false);
        let mut object = ObjectData::new(ObjectId::new(2), spec.clone()).unwrap();
        object.append(&ids(&spec, vec![1, 2, 3]), None).unwrap();
        let stats = object.seal().unwrap();
        assert!(stats.bloom.is_some());
        assert!(stats.may_contain(&PkValue::Int(2)));
        assert!(!stats.may_contain(&PkValue::Int(7)));
        assert!(object.append(&ids(&spec, vec![4]), None).is_err());
    }

    #[test]
    fn test_row_timestamps_follow_block_layout() {
        let spec = spec(2, true);
        let mut object = ObjectData::new(ObjectId::new(3), spec.clone()).unwrap();
        object.append(&ids(&spec, vec![1, 2, 3]), Some(10)).unwrap();
        object.append(&ids(&spec, vec![4]), Some(12)).unwrap();
        assert_eq!(object.row_ts(0, 1), Some(10));
        assert_eq!(object.row_ts(1, 0), Some(10));
        assert_eq!(object.row_ts(1, 1), Some(12));
        assert_eq!(object.block_row_ts(1), Some(&[10, 12][..]));
        assert_eq!(object.max_row_ts(), Some(12));
        assert!(object.append(&ids(&spec, vec![5]), None).is_err());
    }
}
