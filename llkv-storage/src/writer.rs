use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result as LlkvResult};
use llkv_types::ObjectId;

use crate::object::{ObjectSpec, ObjectStats};
use crate::store::ObjectStore;

/// Streams batches into sealed objects of at most `max_rows` rows each.
pub struct ObjectWriter<'a> {
    store: &'a dyn ObjectStore,
    spec: ObjectSpec,
    max_rows: usize,
    current: Option<(ObjectId, usize)>,
    finished: Vec<ObjectStats>,
}

impl<'a> ObjectWriter<'a> {
    pub fn new(store: &'a dyn ObjectStore, spec: ObjectSpec, max_rows: usize) -> LlkvResult<Self> {
        if max_rows == 0 {
            return Err(Error::InvalidArgumentError(
                "object writer needs a positive row limit".into(),
            ));
        }
        Ok(Self {
            store,
            spec,
            max_rows,
            current: None,
            finished: Vec::new(),
        })
    }

    pub fn write(&mut self, batch: &RecordBatch) -> LlkvResult<()> {
        let mut offset = 0;
        while offset < batch.num_rows() {
            let (id, rows) = match self.current {
                Some(cur) => cur,
                None => (self.store.create_object(self.spec.clone())?, 0),
            };
            let take = (self.max_rows - rows).min(batch.num_rows() - offset);
            self.store.append(id, &batch.slice(offset, take), None)?;
            offset += take;
            if rows + take == self.max_rows {
                self.finished.push(self.store.seal(id)?);
                self.current = None;
            } else {
                self.current = Some((id, rows + take));
            }
        }
        Ok(())
    }

    /// Seal the open object and return every object written.
    pub fn finish(mut self) -> LlkvResult<Vec<ObjectStats>> {
        if let Some((id, _)) = self.current.take() {
            self.finished.push(self.store.seal(id)?);
        }
        Ok(self.finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemObjectStore;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use llkv_types::DataKind;
    use std::sync::Arc;

    #[test]
    fn test_writer_rolls_over_at_row_limit() {
        let store = MemObjectStore::new();
        let spec = ObjectSpec {
            kind: DataKind::Tombstone,
            schema: Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)])),
            pk_index: 0,
            block_max_rows: 2,
            track_row_ts: false,
        };
        let batch = RecordBatch::try_new(
            Arc::clone(&spec.schema),
            vec![Arc::new(Int64Array::from((0..7).collect::<Vec<i64>>()))],
        )
        .unwrap();

        let mut writer = ObjectWriter::new(&store, spec, 3).unwrap();
        writer.write(&batch).unwrap();
        let objects = writer.finish().unwrap();

        let rows: Vec<usize> = objects.iter().map(|s| s.rows).collect();
        assert_eq!(rows, vec![3, 3, 1]);
        assert!(objects.iter().all(|s| s.bloom.is_some()));
        assert_eq!(store.len(), 3);
    }
}
