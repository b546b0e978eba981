//! Transaction entries: the units of the two-phase commit pipeline.
//!
//! Every durable effect of a transaction is an entry. Entries are prepared at
//! the prepare timestamp, then either applied one by one (each receiving a CSN
//! from the commit log) or rolled back. Preparing an entry may spawn follow-up
//! entries, and delete transfer may append entries and supersede others while
//! the prepare phase is running, so [`TxnEntries`] prepares in passes until the
//! queue stops growing.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result as LlkvResult};
use llkv_storage::{ObjectOrigin, ObjectStats, Storage, TableEntry};
use llkv_types::{DataKind, ObjectId, TableId, Timestamp, TxnId};

use crate::commit_log::{CommitLog, Csn};

/// What an entry does, as recorded in the commit log and in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryCommand {
    CreateObject {
        table: TableId,
        kind: DataKind,
        object: ObjectId,
        rows: usize,
    },
    AppendRows {
        table: TableId,
        kind: DataKind,
        rows: usize,
    },
}

impl fmt::Display for EntryCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryCommand::CreateObject {
                table,
                kind,
                object,
                rows,
            } => write!(
                f,
                "create {kind} object {object} ({rows} rows) in table {table}"
            ),
            EntryCommand::AppendRows { table, kind, rows } => {
                write!(f, "append {rows} {kind} rows to table {table}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Active,
    /// Replaced by other entries; neither applied nor rolled back.
    Superseded,
}

/// Handed to entries while they prepare.
pub struct PrepareContext<'a> {
    storage: &'a Storage,
    prepare_ts: Timestamp,
    spawned: Vec<Box<dyn TxnEntry>>,
}

impl<'a> PrepareContext<'a> {
    pub fn new(storage: &'a Storage, prepare_ts: Timestamp) -> Self {
        Self {
            storage,
            prepare_ts,
            spawned: Vec::new(),
        }
    }

    pub fn storage(&self) -> &Storage {
        self.storage
    }

    pub fn prepare_ts(&self) -> Timestamp {
        self.prepare_ts
    }

    /// Queue a follow-up entry; it is prepared in a later pass.
    pub fn spawn(&mut self, entry: Box<dyn TxnEntry>) {
        self.spawned.push(entry);
    }
}

/// Handed to entries while they apply.
pub struct EntryContext<'a> {
    pub storage: &'a Storage,
    pub commit_ts: Timestamp,
}

pub trait TxnEntry: Send + fmt::Debug {
    fn command(&self) -> EntryCommand;

    fn prepare_commit(&mut self, ctx: &mut PrepareContext<'_>) -> LlkvResult<()>;

    fn apply_commit(&mut self, ctx: &EntryContext<'_>, csn: Csn) -> LlkvResult<()>;

    fn prepare_rollback(&mut self, _storage: &Storage) -> LlkvResult<()> {
        Ok(())
    }

    fn apply_rollback(&mut self, storage: &Storage) -> LlkvResult<()>;
}

/// A sealed staging object that becomes visible at the commit timestamp.
#[derive(Debug)]
pub struct CreateObjectEntry {
    table: Arc<TableEntry>,
    stats: ObjectStats,
    csn: Option<Csn>,
}

impl CreateObjectEntry {
    pub fn new(table: Arc<TableEntry>, stats: ObjectStats) -> Self {
        Self {
            table,
            stats,
            csn: None,
        }
    }

    pub fn object(&self) -> ObjectId {
        self.stats.id
    }
}

impl TxnEntry for CreateObjectEntry {
    fn command(&self) -> EntryCommand {
        EntryCommand::CreateObject {
            table: self.table.id(),
            kind: self.stats.kind,
            object: self.stats.id,
            rows: self.stats.rows,
        }
    }

    fn prepare_commit(&mut self, ctx: &mut PrepareContext<'_>) -> LlkvResult<()> {
        let data = ctx.storage().store().snapshot(self.stats.id)?;
        if !data.is_sealed() {
            return Err(Error::Internal(format!(
                "staged object {} was not sealed before prepare",
                self.stats.id
            )));
        }
        Ok(())
    }

    fn apply_commit(&mut self, ctx: &EntryContext<'_>, csn: Csn) -> LlkvResult<()> {
        ctx.storage
            .register_object(&self.table, &self.stats, ctx.commit_ts, ObjectOrigin::Txn)?;
        self.csn = Some(csn);
        Ok(())
    }

    fn apply_rollback(&mut self, storage: &Storage) -> LlkvResult<()> {
        if storage.store().contains(self.stats.id) {
            storage.store().remove(self.stats.id)?;
        }
        Ok(())
    }
}

/// In-memory rows appended to the table's appendable lineage at commit.
///
/// Batches larger than `max_rows` are split while preparing; the remainder is
/// spawned as a follow-up entry.
#[derive(Debug)]
pub struct AppendRowsEntry {
    table: Arc<TableEntry>,
    kind: DataKind,
    batch: RecordBatch,
    max_rows: usize,
}

impl AppendRowsEntry {
    pub fn new(table: Arc<TableEntry>, kind: DataKind, batch: RecordBatch, max_rows: usize) -> Self {
        Self {
            table,
            kind,
            batch,
            max_rows: max_rows.max(1),
        }
    }

    pub fn rows(&self) -> usize {
        self.batch.num_rows()
    }
}

impl TxnEntry for AppendRowsEntry {
    fn command(&self) -> EntryCommand {
        EntryCommand::AppendRows {
            table: self.table.id(),
            kind: self.kind,
            rows: self.batch.num_rows(),
        }
    }

    fn prepare_commit(&mut self, ctx: &mut PrepareContext<'_>) -> LlkvResult<()> {
        let rows = self.batch.num_rows();
        if rows > self.max_rows {
            let rest = self.batch.slice(self.max_rows, rows - self.max_rows);
            self.batch = self.batch.slice(0, self.max_rows);
            ctx.spawn(Box::new(AppendRowsEntry::new(
                Arc::clone(&self.table),
                self.kind,
                rest,
                self.max_rows,
            )));
        }
        Ok(())
    }

    fn apply_commit(&mut self, ctx: &EntryContext<'_>, _csn: Csn) -> LlkvResult<()> {
        ctx.storage
            .append_committed(&self.table, self.kind, &self.batch, ctx.commit_ts)
    }

    fn apply_rollback(&mut self, _storage: &Storage) -> LlkvResult<()> {
        Ok(())
    }
}

/// The entry queue of one transaction table.
#[derive(Debug, Default)]
pub struct TxnEntries {
    entries: Vec<Box<dyn TxnEntry>>,
    states: Vec<EntryState>,
}

impl TxnEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: Box<dyn TxnEntry>) -> usize {
        self.entries.push(entry);
        self.states.push(EntryState::Active);
        self.entries.len() - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn supersede(&mut self, index: usize) {
        if let Some(state) = self.states.get_mut(index) {
            *state = EntryState::Superseded;
        }
    }

    #[inline]
    pub fn is_live(&self, index: usize) -> bool {
        matches!(self.states.get(index), Some(EntryState::Active))
    }

    pub fn live_count(&self) -> usize {
        self.states
            .iter()
            .filter(|s| matches!(s, EntryState::Active))
            .count()
    }

    /// `(state, command)` of every entry in queue order.
    pub fn describe(&self) -> Vec<(EntryState, EntryCommand)> {
        self.entries
            .iter()
            .zip(&self.states)
            .map(|(entry, state)| (*state, entry.command()))
            .collect()
    }

    /// Prepare the live entries in `range`; entries they spawn are queued behind.
    pub fn prepare_range(
        &mut self,
        range: Range<usize>,
        ctx: &mut PrepareContext<'_>,
    ) -> LlkvResult<()> {
        for index in range {
            if !self.is_live(index) {
                continue;
            }
            self.entries[index].prepare_commit(ctx)?;
            for spawned in std::mem::take(&mut ctx.spawned) {
                self.push(spawned);
            }
        }
        Ok(())
    }

    /// Prepare every entry from `start` on, pass after pass, until no pass adds
    /// new entries. Returns the number of passes run.
    pub fn prepare_from(
        &mut self,
        start: usize,
        ctx: &mut PrepareContext<'_>,
    ) -> LlkvResult<usize> {
        let mut cursor = start;
        let mut passes = 0;
        while cursor < self.entries.len() {
            let end = self.entries.len();
            self.prepare_range(cursor..end, ctx)?;
            cursor = end;
            passes += 1;
        }
        Ok(passes)
    }

    /// Log and apply every live entry. Any error leaves the queue partially
    /// applied.
    pub fn apply_commit(
        &mut self,
        log: &dyn CommitLog,
        txn_id: TxnId,
        ctx: &EntryContext<'_>,
    ) -> LlkvResult<usize> {
        let mut applied = 0;
        for index in 0..self.entries.len() {
            if !self.is_live(index) {
                continue;
            }
            let entry = &mut self.entries[index];
            let csn = log.add_command(txn_id, &entry.command())?;
            entry.apply_commit(ctx, csn)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Roll back every live entry; stops at the first error.
    pub fn rollback(&mut self, storage: &Storage) -> LlkvResult<()> {
        for index in 0..self.entries.len() {
            if self.is_live(index) {
                self.entries[index].prepare_rollback(storage)?;
            }
        }
        for index in 0..self.entries.len() {
            if self.is_live(index) {
                self.entries[index].apply_rollback(storage)?;
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.states.clear();
    }
}
