//! The per-transaction view of one table.
//!
//! A [`TxnTable`] owns the transaction's staging areas for one table (row data
//! and tombstones) and its entry queue. It runs the append-time dedup tiers,
//! records deletes, and during prepare performs the deferred dedup tiers,
//! delete transfer and write-write validation before handing its entries to
//! the commit pipeline.

use std::collections::BTreeSet;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result as LlkvResult};
use llkv_storage::{
    ObjectWriter, PkValue, ScanBatch, ScanWindow, Storage, TableEntry, find_deletes,
    find_pk_rows, pk_values, scan_visible,
};
use llkv_types::{DataKind, ObjectId, RowIdentity, Timestamp, TxnId};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::commit_log::CommitLog;
use crate::config::{DedupPolicy, TxnConfig};
use crate::conflict::{Liveness, ReadKey, RwChecker};
use crate::dedup::{find_committed_duplicate, with_relocations};
use crate::entry::{
    AppendRowsEntry, CreateObjectEntry, EntryContext, PrepareContext, TxnEntries,
};
use crate::mvcc::TransactionSnapshot;
use crate::transfer::{ChainResolver, Resolution};
use crate::workspace::{StagedAt, TableSpace};

/// Shared state a transaction table works against.
pub struct TableEnv<'a> {
    pub storage: &'a Storage,
    pub config: &'a TxnConfig,
    pub snapshot: TransactionSnapshot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounters {
    pub rows_appended: usize,
    pub rows_deleted: usize,
    pub objects_sealed: usize,
    pub rows_transferred: usize,
}

#[derive(Debug)]
pub struct TxnTable {
    table: Arc<TableEntry>,
    policy: DedupPolicy,
    data: TableSpace,
    tombstones: TableSpace,
    entries: TxnEntries,
    /// Committed data up to here has been deduplicated against.
    dedup_ts: Timestamp,
    /// Rows were staged without a snapshot check; prepare probes the full snapshot.
    snapshot_deferred: bool,
    counters: TableCounters,
}

impl TxnTable {
    pub fn new(
        table: Arc<TableEntry>,
        storage: &Storage,
        config: &TxnConfig,
        start_ts: Timestamp,
    ) -> Self {
        let flush_rows = config.workspace_flush_rows;
        Self {
            data: TableSpace::new(storage.object_spec(&table, DataKind::Data, false), flush_rows),
            tombstones: TableSpace::new(
                storage.object_spec(&table, DataKind::Tombstone, false),
                flush_rows,
            ),
            table,
            policy: config.dedup_policy,
            entries: TxnEntries::new(),
            dedup_ts: start_ts,
            snapshot_deferred: false,
            counters: TableCounters::default(),
        }
    }

    pub fn table(&self) -> &Arc<TableEntry> {
        &self.table
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: DedupPolicy) {
        self.policy = policy;
    }

    pub fn counters(&self) -> TableCounters {
        self.counters
    }

    pub fn data(&self) -> &TableSpace {
        &self.data
    }

    pub fn tombstones(&self) -> &TableSpace {
        &self.tombstones
    }

    pub fn entries(&self) -> &TxnEntries {
        &self.entries
    }

    pub fn dedup_ts(&self) -> Timestamp {
        self.dedup_ts
    }

    /// Stage `batch` after the dedup tiers the policy checks at append.
    pub fn append(&mut self, env: &TableEnv<'_>, batch: RecordBatch) -> LlkvResult<usize> {
        let schema = self.table.schema();
        let batch = schema.rebind(&batch)?;
        let rows = batch.num_rows();
        if rows == 0 {
            return Ok(0);
        }
        let keys = pk_values(batch.column(schema.pk_index()).as_ref())?;
        let column = schema.pk_name();

        let mut seen = FxHashSet::default();
        if let Some(dup) = keys.iter().find(|k| !seen.insert(*k)) {
            return Err(Error::duplicate_entry(dup, column));
        }
        if self.policy.checks_workspace_on_append()
            && let Some(dup) = self.data.find_staged(env.storage.store(), &keys, 0, true)?
        {
            return Err(Error::duplicate_entry(dup, column));
        }
        if self.policy.checks_snapshot_on_append() {
            let own = self.own_deletes(env)?;
            if let Some(dup) = find_committed_duplicate(
                env.storage,
                &self.table,
                &keys,
                ScanWindow::Snapshot(env.snapshot.start_ts),
                &own,
                env.config.max_transfer_hops,
            )? {
                return Err(Error::duplicate_entry(dup, column));
            }
        } else {
            self.snapshot_deferred = true;
        }

        self.data.stage(batch, keys);
        self.counters.rows_appended += rows;
        if self.data.should_seal() {
            self.seal(env.storage, DataKind::Data)?;
        }
        Ok(rows)
    }

    /// Stage tombstones for `rows`, whose primary keys are `keys`.
    pub fn delete(
        &mut self,
        env: &TableEnv<'_>,
        checker: &mut RwChecker,
        rows: &[RowIdentity],
        keys: &[PkValue],
    ) -> LlkvResult<usize> {
        if rows.len() != keys.len() {
            return Err(Error::InvalidArgumentError(format!(
                "delete needs one primary key per row identity ({} rows, {} keys)",
                rows.len(),
                keys.len()
            )));
        }
        if rows.is_empty() {
            return Ok(0);
        }
        let column = self.table.schema().pk_name();
        let mut seen = FxHashSet::default();
        if let Some(dup) = keys.iter().find(|k| !seen.insert(*k)) {
            return Err(Error::duplicate_entry(dup, column));
        }
        if let Some(dup) = self
            .tombstones
            .find_staged(env.storage.store(), keys, 0, true)?
        {
            return Err(Error::duplicate_entry(dup, column));
        }

        let mut read_keys = Vec::new();
        let mut objects = FxHashSet::default();
        for row in rows {
            if !objects.insert(row.object) {
                continue;
            }
            let entry = self.table.get_object_by_id(row.object).ok_or_else(|| {
                Error::InvalidArgumentError(format!(
                    "row {row} does not reference a committed object of table '{}'",
                    self.table.name()
                ))
            })?;
            if entry.kind != DataKind::Data {
                return Err(Error::InvalidArgumentError(format!(
                    "row {row} references a {} object",
                    entry.kind
                )));
            }
            let key = ReadKey::data(&self.table, row.object);
            checker.check_one(env.storage, &key, env.snapshot.start_ts, false)?;
            read_keys.push(key);
        }
        self.verify_row_keys(env.storage, rows, keys)?;

        let batch = self.table.schema().tombstone_batch(keys, rows)?;
        for key in read_keys {
            checker.insert(key);
        }
        self.tombstones.stage(batch, keys.to_vec());
        self.counters.rows_deleted += rows.len();
        if self.tombstones.should_seal() {
            self.seal(env.storage, DataKind::Tombstone)?;
        }
        Ok(rows.len())
    }

    /// Check that each of `rows` exists and holds the matching entry of `keys`.
    fn verify_row_keys(
        &self,
        storage: &Storage,
        rows: &[RowIdentity],
        keys: &[PkValue],
    ) -> LlkvResult<()> {
        let pk_index = self.table.schema().pk_index();
        let mut by_block: FxHashMap<(ObjectId, u32), Vec<usize>> = FxHashMap::default();
        for (pos, row) in rows.iter().enumerate() {
            by_block.entry((row.object, row.block)).or_default().push(pos);
        }
        for ((object, block), positions) in by_block {
            let data = storage.store().snapshot(object)?;
            if block as usize >= data.block_count() {
                return Err(Error::InvalidArgumentError(format!(
                    "object {object} has no block {block}"
                )));
            }
            let columns = data.load_columns(block, &[pk_index])?;
            let block_keys = pk_values(columns[0].as_ref())?;
            for pos in positions {
                let row = rows[pos];
                match block_keys.get(row.offset as usize) {
                    None => {
                        return Err(Error::InvalidArgumentError(format!(
                            "row {row} is past the end of its block"
                        )));
                    }
                    Some(found) if *found != keys[pos] => {
                        return Err(Error::InvalidArgumentError(format!(
                            "row {row} holds key {found}, not {}",
                            keys[pos]
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Row identity of the live row holding `key` in the transaction's view.
    pub fn get_by_filter(&self, env: &TableEnv<'_>, key: &PkValue) -> LlkvResult<RowIdentity> {
        let start_ts = env.snapshot.start_ts;
        let own = self.own_deletes(env)?;
        let candidates: Vec<RowIdentity> = find_pk_rows(
            env.storage,
            &self.table,
            std::slice::from_ref(key),
            ScanWindow::Snapshot(start_ts),
        )?
        .into_iter()
        .map(|m| m.row)
        .filter(|row| !own.contains(row))
        .collect();
        if candidates.is_empty() {
            return Err(Error::NotFound);
        }
        let keys = vec![key.clone(); candidates.len()];
        let deleted = find_deletes(env.storage, &self.table, &keys, &candidates, 0, start_ts)?;
        candidates
            .into_iter()
            .enumerate()
            .find(|(pos, _)| !deleted.contains(*pos as u32))
            .map(|(_, row)| row)
            .ok_or(Error::NotFound)
    }

    /// Committed rows visible at the start timestamp minus the rows this
    /// transaction deleted. Staged rows are not included.
    pub fn scan(&self, env: &TableEnv<'_>) -> LlkvResult<Vec<ScanBatch>> {
        let hidden = self.own_deletes(env)?;
        scan_visible(env.storage, &self.table, env.snapshot.start_ts, &hidden)
    }

    fn own_deletes(&self, env: &TableEnv<'_>) -> LlkvResult<FxHashSet<RowIdentity>> {
        Ok(self
            .tombstones
            .tombstones(env.storage.store())?
            .into_iter()
            .map(|t| t.row)
            .collect())
    }

    fn seal(&mut self, storage: &Storage, kind: DataKind) -> LlkvResult<()> {
        let space = match kind {
            DataKind::Data => &mut self.data,
            DataKind::Tombstone => &mut self.tombstones,
        };
        for stats in space.seal_pending(storage.store())? {
            tracing::trace!(
                "[DEDUP] table '{}' sealed staged {kind} object {} ({} rows)",
                self.table.name(),
                stats.id,
                stats.rows
            );
            let entry = self.entries.push(Box::new(CreateObjectEntry::new(
                Arc::clone(&self.table),
                stats.clone(),
            )));
            space.add_sealed(stats, entry);
            self.counters.objects_sealed += 1;
        }
        Ok(())
    }

    /// Run the dedup tiers still owed up to `ts`.
    ///
    /// Source-persisted duplicates are checked every call. Committed data is
    /// probed as a full snapshot when the append-time snapshot check was skipped,
    /// and otherwise only for `(dedup_ts, ts]`.
    pub fn prepare_dedup(&mut self, env: &TableEnv<'_>, ts: Timestamp) -> LlkvResult<()> {
        if !self.policy.checks_on_prepare() {
            return Ok(());
        }
        let store = env.storage.store();
        let column = self.table.schema().pk_name();
        if let Some(dup) = self.data.source_duplicate(store)? {
            return Err(Error::duplicate_entry(dup, column));
        }
        if ts <= self.dedup_ts && !self.snapshot_deferred {
            return Ok(());
        }
        let keys = self.data.staged_keys(store)?;
        if keys.is_empty() {
            self.dedup_ts = ts;
            self.snapshot_deferred = false;
            return Ok(());
        }

        let hops = env.config.max_transfer_hops;
        let (window, own) = if self.snapshot_deferred {
            let own = with_relocations(
                env.storage,
                &self.table,
                self.own_deletes(env)?,
                ts,
                hops,
            )?;
            (ScanWindow::Snapshot(ts), own)
        } else {
            let window = ScanWindow::Committed {
                from: self.dedup_ts + 1,
                to: ts,
            };
            (window, self.own_deletes(env)?)
        };
        if let Some(dup) =
            find_committed_duplicate(env.storage, &self.table, &keys, window, &own, hops)?
        {
            return Err(Error::duplicate_entry(dup, column));
        }
        tracing::trace!(
            "[DEDUP] table '{}' checked {} staged keys over {window:?}",
            self.table.name(),
            keys.len()
        );
        self.dedup_ts = ts;
        self.snapshot_deferred = false;
        Ok(())
    }

    /// Two-pass prepare of this table at `ts`.
    ///
    /// Pass one prepares the entries queued before the phase started. Deletes
    /// are then transferred off merged objects and checked against concurrent
    /// deletes, the in-memory batches become append entries, and follow-up
    /// passes prepare everything queued since until the queue is stable.
    pub fn prepare_commit(
        &mut self,
        env: &TableEnv<'_>,
        checker: &mut RwChecker,
        ts: Timestamp,
    ) -> LlkvResult<()> {
        let mut ctx = PrepareContext::new(env.storage, ts);
        let initial = self.entries.len();
        self.entries.prepare_range(0..initial, &mut ctx)?;

        let transferred = self.transfer_deletes(env, checker, ts)?;
        self.check_write_conflicts(env, ts)?;
        self.flush_pending(env)?;

        let passes = self.entries.prepare_from(initial, &mut ctx)?;
        tracing::debug!(
            "[COMMIT] table '{}' prepared {} entries at ts {ts} ({passes} follow-up passes, {transferred} deletes transferred)",
            self.table.name(),
            self.entries.live_count()
        );
        Ok(())
    }

    /// Move staged tombstones whose target object was dropped at or before
    /// `as_of` onto the rows' current identities.
    ///
    /// Moved tombstones are rewritten into new sealed objects. A sealed staging
    /// object holding any moved tombstone is superseded and all of its rows are
    /// rewritten. Returns the number of tombstones moved.
    pub fn transfer_deletes(
        &mut self,
        env: &TableEnv<'_>,
        checker: &mut RwChecker,
        as_of: Timestamp,
    ) -> LlkvResult<usize> {
        if self.tombstones.is_empty() {
            return Ok(0);
        }
        let storage = env.storage;
        let store = storage.store();
        let table = Arc::clone(&self.table);
        let staged = self.tombstones.tombstones(store)?;
        let stale: BTreeSet<ObjectId> = staged
            .iter()
            .map(|t| t.row.object)
            .filter(|object| {
                matches!(
                    RwChecker::liveness(&table, *object, as_of),
                    Liveness::Dropped(_)
                )
            })
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let mut resolver =
            ChainResolver::new(storage, &table, as_of, env.config.max_transfer_hops);
        let mut moved: FxHashMap<usize, RowIdentity> = FxHashMap::default();
        for (pos, tombstone) in staged.iter().enumerate() {
            if !stale.contains(&tombstone.row.object) {
                continue;
            }
            let (key, row) = (&tombstone.key, tombstone.row);
            match resolver.resolve(row)? {
                Resolution::Landed { row: to, hops } => {
                    tracing::trace!(
                        "[TRANSFER] table '{}' delete of key {key} moved {row} -> {to} in {hops} hops",
                        table.name()
                    );
                    moved.insert(pos, to);
                }
                Resolution::PageMissing(object) => {
                    return Err(Error::ReadWriteConflict(format!(
                        "transfer page of object {object} is gone; delete of key {key} at {row} cannot follow it"
                    )));
                }
                Resolution::ObjectMissing(object) => {
                    return Err(Error::ReadWriteConflict(format!(
                        "object {object} is unknown to table '{}'; delete of key {key} at {row} cannot follow it",
                        table.name()
                    )));
                }
                Resolution::RowMissing(object) => {
                    return Err(Error::WriteWriteConflict(format!(
                        "row {row} (key {key}) was deleted concurrently and dropped by the merge of {object}"
                    )));
                }
                Resolution::Exhausted => {
                    return Err(Error::WriteWriteConflict(format!(
                        "delete of key {key} at {row} did not land within {} transfer hops",
                        env.config.max_transfer_hops
                    )));
                }
            }
        }

        let rewritten: BTreeSet<usize> = staged
            .iter()
            .enumerate()
            .filter(|(pos, _)| moved.contains_key(pos))
            .filter_map(|(_, t)| match t.at {
                StagedAt::Sealed(index) => Some(index),
                StagedAt::Pending(_) => None,
            })
            .collect();
        let mut keys = Vec::new();
        let mut rows = Vec::new();
        let mut keep_pending = vec![true; self.tombstones.pending_rows()];
        for (pos, tombstone) in staged.iter().enumerate() {
            let target = moved.get(&pos).copied();
            match tombstone.at {
                StagedAt::Sealed(index) if rewritten.contains(&index) => {
                    keys.push(tombstone.key.clone());
                    rows.push(target.unwrap_or(tombstone.row));
                }
                StagedAt::Pending(index) => {
                    if let Some(to) = target {
                        keep_pending[index] = false;
                        keys.push(tombstone.key.clone());
                        rows.push(to);
                    }
                }
                StagedAt::Sealed(_) => {}
            }
        }

        let batch = table.schema().tombstone_batch(&keys, &rows)?;
        let mut writer = ObjectWriter::new(
            store,
            self.tombstones.spec().clone(),
            self.tombstones.flush_rows(),
        )?;
        writer.write(&batch)?;
        let objects = writer.finish()?;

        for index in rewritten.iter().rev() {
            let old = self.tombstones.remove_sealed(*index);
            self.entries.supersede(old.entry);
            store.remove(old.stats.id)?;
        }
        self.tombstones.retain_pending(&keep_pending)?;
        for stats in objects {
            let entry = self.entries.push(Box::new(CreateObjectEntry::new(
                Arc::clone(&table),
                stats.clone(),
            )));
            self.tombstones.add_sealed(stats, entry);
        }

        for object in &stale {
            checker.delete(&ReadKey::data(&table, *object));
        }
        for to in moved.values() {
            checker.insert(ReadKey::data(&table, to.object));
        }
        self.counters.rows_transferred += moved.len();
        tracing::debug!(
            "[TRANSFER] table '{}' moved {} deletes off {} dropped objects ({} pages pinned, {} staged objects superseded)",
            table.name(),
            moved.len(),
            stale.len(),
            resolver.pinned(),
            rewritten.len()
        );
        Ok(moved.len())
    }

    /// Fail if another transaction committed a delete of a staged tombstone's
    /// row after this transaction started.
    pub fn check_write_conflicts(&self, env: &TableEnv<'_>, ts: Timestamp) -> LlkvResult<()> {
        let start_ts = env.snapshot.start_ts;
        if ts <= start_ts || self.tombstones.is_empty() {
            return Ok(());
        }
        let staged = self.tombstones.tombstones(env.storage.store())?;
        let keys: Vec<PkValue> = staged.iter().map(|t| t.key.clone()).collect();
        let rows: Vec<RowIdentity> = staged.iter().map(|t| t.row).collect();
        let deleted = find_deletes(env.storage, &self.table, &keys, &rows, start_ts + 1, ts)?;
        if let Some(pos) = deleted.min() {
            let hit = &staged[pos as usize];
            return Err(Error::WriteWriteConflict(format!(
                "row {} (key {}) of table '{}' was deleted by a concurrent transaction",
                hit.row,
                hit.key,
                self.table.name()
            )));
        }
        Ok(())
    }

    fn flush_pending(&mut self, env: &TableEnv<'_>) -> LlkvResult<()> {
        let max_rows = env.storage.config().appendable_object_max_rows;
        for kind in [DataKind::Data, DataKind::Tombstone] {
            let space = match kind {
                DataKind::Data => &mut self.data,
                DataKind::Tombstone => &mut self.tombstones,
            };
            if let Some(batch) = space.take_pending()? {
                self.entries.push(Box::new(AppendRowsEntry::new(
                    Arc::clone(&self.table),
                    kind,
                    batch,
                    max_rows,
                )));
            }
        }
        Ok(())
    }

    pub fn apply_commit(
        &mut self,
        log: &dyn CommitLog,
        txn_id: TxnId,
        storage: &Storage,
        commit_ts: Timestamp,
    ) -> LlkvResult<usize> {
        let ctx = EntryContext { storage, commit_ts };
        self.entries.apply_commit(log, txn_id, &ctx)
    }

    /// Roll back every live entry and discard the staging areas.
    pub fn rollback(&mut self, storage: &Storage) -> LlkvResult<()> {
        let result = self.entries.rollback(storage);
        self.entries.clear();
        self.data.clear();
        self.tombstones.clear();
        result
    }
}
