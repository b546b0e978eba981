//! MVCC visibility probes over committed objects.
//!
//! Lookups prune in three steps before touching row data: object zonemap
//! against the probe set, bloom filter (sealed objects only), then per-block
//! zonemaps. Only blocks surviving all three are loaded and scanned exactly.

use std::sync::Arc;

use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch;
use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result as LlkvResult};
use llkv_types::{DataKind, RowIdentity, Timestamp};
use roaring::RoaringBitmap;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::catalog::{ObjectEntry, ObjectOrigin, TableEntry};
use crate::constants::{TOMBSTONE_PK_COLUMN, TOMBSTONE_ROWID_COLUMN};
use crate::keys::{PkValue, pk_values};
use crate::object::ObjectData;
use crate::schema::row_identities;
use crate::storage::Storage;
use crate::zonemap::ZoneMap;

/// Which committed rows a primary-key lookup considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanWindow {
    /// Everything visible to a read at the timestamp.
    Snapshot(Timestamp),
    /// Rows committed by transactions within `[from, to]`, whether or not their
    /// object has since been merged away. Merge outputs are skipped: their rows
    /// were committed before, elsewhere.
    Committed { from: Timestamp, to: Timestamp },
}

impl ScanWindow {
    /// Tombstones that can hide a match found in this window.
    pub fn delete_range(&self) -> (Timestamp, Timestamp) {
        match *self {
            ScanWindow::Snapshot(ts) => (0, ts),
            ScanWindow::Committed { from, to } => (from, to),
        }
    }

    fn may_include(&self, entry: &ObjectEntry) -> bool {
        match *self {
            ScanWindow::Snapshot(ts) => entry.visible_by_ts(ts),
            ScanWindow::Committed { to, .. } => {
                entry.origin == ObjectOrigin::Txn && entry.created_at <= to
            }
        }
    }

    fn includes_object(&self, entry: &ObjectEntry, data: &ObjectData) -> bool {
        match *self {
            ScanWindow::Snapshot(_) => true,
            ScanWindow::Committed { from, .. } => {
                entry.created_at >= from
                    || entry.open
                    || data.max_row_ts().is_some_and(|ts| ts >= from)
            }
        }
    }

    fn includes_row(&self, committed_at: Timestamp) -> bool {
        match *self {
            ScanWindow::Snapshot(ts) => committed_at <= ts,
            ScanWindow::Committed { from, to } => from <= committed_at && committed_at <= to,
        }
    }
}

/// A committed row whose primary key equals `keys[key_index]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PkMatch {
    pub key_index: usize,
    pub row: RowIdentity,
}

fn key_positions(keys: &[PkValue]) -> FxHashMap<&PkValue, Vec<usize>> {
    let mut positions: FxHashMap<&PkValue, Vec<usize>> = FxHashMap::default();
    for (i, key) in keys.iter().enumerate() {
        positions.entry(key).or_default().push(i);
    }
    positions
}

/// Resolve primary keys to the committed rows holding them within `window`.
///
/// Tombstones are not consulted; callers filter matches with [`find_deletes`].
pub fn find_pk_rows(
    storage: &Storage,
    table: &TableEntry,
    keys: &[PkValue],
    window: ScanWindow,
) -> LlkvResult<Vec<PkMatch>> {
    let mut out = Vec::new();
    if keys.is_empty() {
        return Ok(out);
    }
    let probe = ZoneMap::from_values(keys);
    let wanted = key_positions(keys);
    let pk_index = table.schema().pk_index();

    for entry in table.objects(DataKind::Data) {
        if !window.may_include(&entry) {
            continue;
        }
        let data = storage.store().snapshot(entry.id)?;
        if !window.includes_object(&entry, &data) || !data.zonemap().intersects(&probe) {
            continue;
        }
        if data.is_sealed() && !keys.iter().any(|k| data.may_contain(k)) {
            continue;
        }
        for block in 0..data.block_count() as u32 {
            if !data
                .block_zonemap(block)
                .is_some_and(|zm| zm.intersects(&probe))
            {
                continue;
            }
            let columns = data.load_columns(block, &[pk_index])?;
            let block_keys = pk_values(columns[0].as_ref())?;
            let row_ts = data.block_row_ts(block);
            for (offset, key) in block_keys.iter().enumerate() {
                let Some(positions) = wanted.get(key) else {
                    continue;
                };
                let committed_at = row_ts.map_or(entry.created_at, |ts| ts[offset]);
                if !window.includes_row(committed_at) {
                    continue;
                }
                let row = RowIdentity::new(entry.id, block, offset as u32);
                out.extend(positions.iter().map(|&key_index| PkMatch { key_index, row }));
            }
        }
    }
    tracing::trace!(
        "[VISIBILITY] table '{}' pk probe of {} keys over {:?} found {} rows",
        table.name(),
        keys.len(),
        window,
        out.len()
    );
    Ok(out)
}

/// Positions of `rows` deleted by a tombstone committed within `[from, to]`.
///
/// `keys[i]` is the primary key of `rows[i]`; it drives zonemap and bloom pruning
/// of tombstone objects while the exact match is on the row identity.
pub fn find_deletes(
    storage: &Storage,
    table: &TableEntry,
    keys: &[PkValue],
    rows: &[RowIdentity],
    from: Timestamp,
    to: Timestamp,
) -> LlkvResult<RoaringBitmap> {
    if keys.len() != rows.len() {
        return Err(Error::Internal(format!(
            "delete probe has {} keys for {} rows",
            keys.len(),
            rows.len()
        )));
    }
    let mut deleted = RoaringBitmap::new();
    if rows.is_empty() || from > to {
        return Ok(deleted);
    }
    let probe = ZoneMap::from_values(keys);
    let mut wanted: FxHashMap<RowIdentity, Vec<u32>> = FxHashMap::default();
    for (i, row) in rows.iter().enumerate() {
        wanted.entry(*row).or_default().push(i as u32);
    }

    for entry in table.objects(DataKind::Tombstone) {
        if entry.created_at > to {
            continue;
        }
        let data = storage.store().snapshot(entry.id)?;
        let in_window = entry.created_at >= from
            || entry.open
            || data.max_row_ts().is_some_and(|ts| ts >= from);
        if !in_window || !data.zonemap().intersects(&probe) {
            continue;
        }
        if data.is_sealed() && !keys.iter().any(|k| data.may_contain(k)) {
            continue;
        }
        for block in 0..data.block_count() as u32 {
            if !data
                .block_zonemap(block)
                .is_some_and(|zm| zm.intersects(&probe))
            {
                continue;
            }
            let columns = data.load_columns(block, &[TOMBSTONE_ROWID_COLUMN])?;
            let targets = row_identities(columns[0].as_ref())?;
            let row_ts = data.block_row_ts(block);
            for (offset, target) in targets.iter().enumerate() {
                let committed_at = row_ts.map_or(entry.created_at, |ts| ts[offset]);
                if committed_at < from || committed_at > to {
                    continue;
                }
                if let Some(positions) = wanted.get(target) {
                    deleted.extend(positions.iter().copied());
                }
            }
        }
    }
    Ok(deleted)
}

/// Committed rows of one block, with their identities.
#[derive(Debug, Clone)]
pub struct ScanBatch {
    pub rows: Vec<RowIdentity>,
    pub batch: RecordBatch,
}

struct BlockCandidates {
    data: Arc<ObjectData>,
    block: u32,
    offsets: Vec<u32>,
}

/// Every row visible at `ts`, minus rows listed in `hidden`.
pub fn scan_visible(
    storage: &Storage,
    table: &TableEntry,
    ts: Timestamp,
    hidden: &FxHashSet<RowIdentity>,
) -> LlkvResult<Vec<ScanBatch>> {
    let pk_index = table.schema().pk_index();
    let mut candidates = Vec::new();
    let mut keys = Vec::new();
    let mut rows = Vec::new();

    for entry in table.visible_objects(DataKind::Data, ts) {
        let data = storage.store().snapshot(entry.id)?;
        for block in 0..data.block_count() as u32 {
            let batch = data.block(block)?;
            let block_keys = pk_values(batch.column(pk_index).as_ref())?;
            let row_ts = data.block_row_ts(block);
            let mut offsets = Vec::new();
            for (offset, key) in block_keys.into_iter().enumerate() {
                if row_ts.is_some_and(|t| t[offset] > ts) {
                    continue;
                }
                let row = RowIdentity::new(entry.id, block, offset as u32);
                if hidden.contains(&row) {
                    continue;
                }
                offsets.push(offset as u32);
                keys.push(key);
                rows.push(row);
            }
            if !offsets.is_empty() {
                candidates.push(BlockCandidates {
                    data: Arc::clone(&data),
                    block,
                    offsets,
                });
            }
        }
    }

    let deleted = find_deletes(storage, table, &keys, &rows, 0, ts)?;
    let mut out = Vec::with_capacity(candidates.len());
    let mut position = 0u32;
    for candidate in candidates {
        let batch = candidate.data.block(candidate.block)?;
        let mut keep = vec![false; batch.num_rows()];
        let mut kept_rows = Vec::with_capacity(candidate.offsets.len());
        for offset in candidate.offsets {
            if !deleted.contains(position) {
                keep[offset as usize] = true;
                kept_rows.push(rows[position as usize]);
            }
            position += 1;
        }
        if kept_rows.is_empty() {
            continue;
        }
        let filtered = filter_record_batch(batch, &BooleanArray::from(keep))?;
        out.push(ScanBatch {
            rows: kept_rows,
            batch: filtered,
        });
    }
    Ok(out)
}

/// A committed tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTombstone {
    pub key: PkValue,
    pub row: RowIdentity,
    pub committed_at: Timestamp,
}

/// Every tombstone committed at or before `ts`.
pub fn scan_tombstones(
    storage: &Storage,
    table: &TableEntry,
    ts: Timestamp,
) -> LlkvResult<Vec<CommittedTombstone>> {
    let mut out = Vec::new();
    for entry in table.objects(DataKind::Tombstone) {
        if entry.created_at > ts {
            continue;
        }
        let data = storage.store().snapshot(entry.id)?;
        for block in 0..data.block_count() as u32 {
            let columns =
                data.load_columns(block, &[TOMBSTONE_PK_COLUMN, TOMBSTONE_ROWID_COLUMN])?;
            let keys = pk_values(columns[0].as_ref())?;
            let targets = row_identities(columns[1].as_ref())?;
            let row_ts = data.block_row_ts(block);
            for (offset, (key, row)) in keys.into_iter().zip(targets).enumerate() {
                let committed_at = row_ts.map_or(entry.created_at, |t| t[offset]);
                if committed_at <= ts {
                    out.push(CommittedTombstone {
                        key,
                        row,
                        committed_at,
                    });
                }
            }
        }
    }
    Ok(out)
}
