//! Merge task: rewrite data objects into one sorted object and publish the
//! transfer pages that let in-flight deletes follow the relocated rows.
//!
//! Which objects to merge and when is up to the caller; this module only
//! performs a merge it is handed.

use std::sync::Arc;

use arrow::array::{BooleanArray, UInt32Array};
use arrow::compute::{concat_batches, filter_record_batch, sort_to_indices, take};
use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result as LlkvResult};
use llkv_types::{DataKind, ObjectId, RowIdentity, Timestamp};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::catalog::{ObjectEntry, ObjectOrigin, TableEntry};
use crate::keys::pk_values;
use crate::storage::Storage;
use crate::transfer::TransferPage;
use crate::visibility::find_deletes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The merged object; `None` when every source row was already deleted.
    pub created: Option<ObjectId>,
    pub dropped: Vec<ObjectId>,
    pub rows_kept: usize,
    pub rows_removed: usize,
    pub merged_at: Timestamp,
}

/// Merge `sources` of `table` as of `merged_at`.
///
/// Rows deleted by tombstones committed at or before `merged_at` are dropped, the
/// rest are sorted by primary key into a new sealed object visible from
/// `merged_at`. Each source gets a transfer page and is soft-deleted at
/// `merged_at`. The caller must serialize merges with commits.
pub fn merge_objects(
    storage: &Storage,
    table: &TableEntry,
    sources: &[ObjectId],
    merged_at: Timestamp,
) -> LlkvResult<MergeOutcome> {
    if sources.is_empty() {
        return Err(Error::InvalidArgumentError(
            "merge needs at least one source object".into(),
        ));
    }
    let mut seen = FxHashSet::default();
    if !sources.iter().all(|id| seen.insert(*id)) {
        return Err(Error::InvalidArgumentError(
            "merge sources must be distinct".into(),
        ));
    }

    let schema = Arc::clone(table.schema().schema());
    let pk_index = table.schema().pk_index();
    let mut batches: Vec<RecordBatch> = Vec::new();
    let mut keys = Vec::new();
    let mut origins: Vec<RowIdentity> = Vec::new();

    for &id in sources {
        let entry = table.get_object_by_id(id).ok_or_else(|| {
            Error::CatalogError(format!("object {id} is not part of table '{}'", table.name()))
        })?;
        validate_source(&entry, merged_at)?;
        let data = storage.store().snapshot(id)?;
        if data.max_row_ts().is_some_and(|ts| ts > merged_at) {
            return Err(Error::InvalidArgumentError(format!(
                "object {id} holds rows committed after merge timestamp {merged_at}"
            )));
        }
        for block in 0..data.block_count() as u32 {
            let batch = data.block(block)?;
            keys.extend(pk_values(batch.column(pk_index).as_ref())?);
            origins.extend(
                (0..batch.num_rows() as u32).map(|offset| RowIdentity::new(id, block, offset)),
            );
            batches.push(batch.clone());
        }
    }

    let deleted = find_deletes(storage, table, &keys, &origins, 0, merged_at)?;
    let combined = concat_batches(&schema, &batches)?;
    let keep: Vec<bool> = (0..combined.num_rows() as u32)
        .map(|i| !deleted.contains(i))
        .collect();
    let kept = filter_record_batch(&combined, &BooleanArray::from(keep.clone()))?;
    let kept_origins: Vec<RowIdentity> = origins
        .iter()
        .zip(&keep)
        .filter_map(|(row, keep)| keep.then_some(*row))
        .collect();

    let order = sort_to_indices(kept.column(pk_index).as_ref(), None, None)?;
    let sorted = take_rows(&kept, &order)?;

    let created = if sorted.num_rows() > 0 {
        let id = storage
            .store()
            .create_object(storage.object_spec(table, DataKind::Data, false))?;
        storage.store().append(id, &sorted, None)?;
        storage.store().seal(id)?;
        Some(id)
    } else {
        None
    };

    let block_max = storage.config().block_max_rows;
    let mut pages: FxHashMap<ObjectId, TransferPage> = sources
        .iter()
        .map(|&id| (id, TransferPage::new(id, merged_at)))
        .collect();
    if let Some(new_id) = created {
        for (new_pos, &old_pos) in order.values().iter().enumerate() {
            let old = kept_origins[old_pos as usize];
            let to = RowIdentity::new(
                new_id,
                (new_pos / block_max) as u32,
                (new_pos % block_max) as u32,
            );
            if let Some(page) = pages.get_mut(&old.object) {
                page.insert(old.block, old.offset, to);
            }
        }
    }

    for page in pages.into_values() {
        storage.transfer_table().add_page(page);
    }
    if let Some(id) = created {
        table.create_object(ObjectEntry {
            id,
            kind: DataKind::Data,
            created_at: merged_at,
            dropped_at: None,
            origin: ObjectOrigin::Merge,
            open: false,
        })?;
    }
    for &id in sources {
        table.soft_delete(id, merged_at)?;
    }

    let outcome = MergeOutcome {
        created,
        dropped: sources.to_vec(),
        rows_kept: sorted.num_rows(),
        rows_removed: deleted.len() as usize,
        merged_at,
    };
    tracing::debug!(
        "[MERGE] table '{}' merged {} objects into {:?} at ts {} (kept {}, removed {})",
        table.name(),
        sources.len(),
        outcome.created,
        merged_at,
        outcome.rows_kept,
        outcome.rows_removed
    );
    Ok(outcome)
}

fn validate_source(entry: &ObjectEntry, merged_at: Timestamp) -> LlkvResult<()> {
    if entry.kind != DataKind::Data {
        return Err(Error::InvalidArgumentError(format!(
            "object {} is a {} object; only data objects are merged",
            entry.id, entry.kind
        )));
    }
    if let Some(dropped) = entry.dropped_at {
        return Err(Error::WriteWriteConflict(format!(
            "object {} was already dropped at {dropped}",
            entry.id
        )));
    }
    if entry.created_at > merged_at {
        return Err(Error::InvalidArgumentError(format!(
            "object {} is created at {} after merge timestamp {merged_at}",
            entry.id, entry.created_at
        )));
    }
    Ok(())
}

fn take_rows(batch: &RecordBatch, indices: &UInt32Array) -> LlkvResult<RecordBatch> {
    let columns = batch
        .columns()
        .iter()
        .map(|column| take(column.as_ref(), indices, None))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}
