//! Transaction lifecycle: `Active -> Preparing -> Prepared -> Committed`, or
//! `RolledBack` from any state before `Prepared`.

use std::fmt;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result as LlkvResult};
use llkv_storage::{PkValue, ScanBatch};
use llkv_types::{DbId, RowIdentity, TableId, Timestamp, TxnId};
use rustc_hash::FxHashMap;

use crate::config::DedupPolicy;
use crate::conflict::{ReadKey, RwChecker};
use crate::database::Database;
use crate::diagnostics::{EntryDiagnostic, FatalDiagnostic, TableDiagnostic};
use crate::mvcc::TransactionSnapshot;
use crate::table::{TableEnv, TxnTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Preparing,
    Prepared,
    Committed,
    RolledBack,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxnState::Active => "active",
            TxnState::Preparing => "preparing",
            TxnState::Prepared => "prepared",
            TxnState::Committed => "committed",
            TxnState::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// A transaction over the tables of one [`Database`].
///
/// Writes are staged privately and become visible to others only at commit.
/// Reads see the committed state as of the start timestamp. A transaction that
/// is dropped while still active is rolled back.
pub struct Transaction {
    db: Arc<Database>,
    snapshot: TransactionSnapshot,
    state: TxnState,
    tables: Vec<TxnTable>,
    table_index: FxHashMap<(DbId, TableId), usize>,
    checker: RwChecker,
    prepare_ts: Option<Timestamp>,
    /// Recorded in the commit log.
    logged: bool,
}

impl Transaction {
    pub(crate) fn new(db: Arc<Database>, snapshot: TransactionSnapshot) -> Self {
        Self {
            db,
            snapshot,
            state: TxnState::Active,
            tables: Vec::new(),
            table_index: FxHashMap::default(),
            checker: RwChecker::new(snapshot.start_ts),
            prepare_ts: None,
            logged: false,
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.snapshot.txn_id
    }

    pub fn start_ts(&self) -> Timestamp {
        self.snapshot.start_ts
    }

    pub fn prepare_ts(&self) -> Option<Timestamp> {
        self.prepare_ts
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn snapshot(&self) -> TransactionSnapshot {
        self.snapshot
    }

    /// Objects this transaction depends on.
    pub fn read_set(&self) -> Vec<ReadKey> {
        self.checker.keys().copied().collect()
    }

    fn ensure_active(&self) -> LlkvResult<()> {
        self.db.ensure_healthy()?;
        if self.state != TxnState::Active {
            return Err(Error::TransactionContextError(format!(
                "transaction {} is {}",
                self.snapshot.txn_id, self.state
            )));
        }
        Ok(())
    }

    fn table_slot(&mut self, db: DbId, table: TableId) -> LlkvResult<usize> {
        self.ensure_active()?;
        if let Some(&slot) = self.table_index.get(&(db, table)) {
            return Ok(slot);
        }
        let entry = self.db.storage().table(db, table)?;
        let txn_table = TxnTable::new(
            entry,
            self.db.storage(),
            &self.db.config().txn,
            self.snapshot.start_ts,
        );
        self.tables.push(txn_table);
        let slot = self.tables.len() - 1;
        self.table_index.insert((db, table), slot);
        Ok(slot)
    }

    /// Override the dedup policy of one table for this transaction.
    pub fn set_dedup_policy(
        &mut self,
        db: DbId,
        table: TableId,
        policy: DedupPolicy,
    ) -> LlkvResult<()> {
        let slot = self.table_slot(db, table)?;
        self.tables[slot].set_policy(policy);
        Ok(())
    }

    /// Stage rows. Fails with `DuplicateEntry` if a primary key collides with a
    /// key the table's dedup policy checks at append.
    pub fn append(&mut self, db: DbId, table: TableId, batch: RecordBatch) -> LlkvResult<usize> {
        let slot = self.table_slot(db, table)?;
        let env = TableEnv {
            storage: self.db.storage(),
            config: &self.db.config().txn,
            snapshot: self.snapshot,
        };
        self.tables[slot].append(&env, batch)
    }

    /// Stage deletes of committed rows; `keys[i]` is the primary key of `rows[i]`.
    pub fn delete(
        &mut self,
        db: DbId,
        table: TableId,
        rows: &[RowIdentity],
        keys: &[PkValue],
    ) -> LlkvResult<usize> {
        let slot = self.table_slot(db, table)?;
        let env = TableEnv {
            storage: self.db.storage(),
            config: &self.db.config().txn,
            snapshot: self.snapshot,
        };
        self.tables[slot].delete(&env, &mut self.checker, rows, keys)
    }

    /// Look up the live row holding `key` and delete it.
    pub fn delete_by_key(
        &mut self,
        db: DbId,
        table: TableId,
        key: &PkValue,
    ) -> LlkvResult<RowIdentity> {
        let row = self.get_by_filter(db, table, key)?;
        self.delete(db, table, &[row], std::slice::from_ref(key))?;
        Ok(row)
    }

    pub fn get_by_filter(
        &mut self,
        db: DbId,
        table: TableId,
        key: &PkValue,
    ) -> LlkvResult<RowIdentity> {
        let slot = self.table_slot(db, table)?;
        let env = TableEnv {
            storage: self.db.storage(),
            config: &self.db.config().txn,
            snapshot: self.snapshot,
        };
        self.tables[slot].get_by_filter(&env, key)
    }

    pub fn scan(&mut self, db: DbId, table: TableId) -> LlkvResult<Vec<ScanBatch>> {
        let slot = self.table_slot(db, table)?;
        let env = TableEnv {
            storage: self.db.storage(),
            config: &self.db.config().txn,
            snapshot: self.snapshot,
        };
        self.tables[slot].scan(&env)
    }

    /// Commit at a freshly allocated timestamp, returned on success.
    pub fn commit(mut self) -> LlkvResult<Timestamp> {
        self.commit_inner(None)
    }

    /// Commit at `commit_ts`, which must be after the start timestamp and after
    /// every earlier commit.
    pub fn commit_at(mut self, commit_ts: Timestamp) -> LlkvResult<Timestamp> {
        self.commit_inner(Some(commit_ts))
    }

    pub fn rollback(mut self) -> LlkvResult<()> {
        if self.state != TxnState::Active {
            return Err(Error::TransactionContextError(format!(
                "transaction {} is {}",
                self.snapshot.txn_id, self.state
            )));
        }
        self.rollback_inner()
    }

    fn commit_inner(&mut self, requested: Option<Timestamp>) -> LlkvResult<Timestamp> {
        self.ensure_active()?;
        self.state = TxnState::Preparing;
        let db = Arc::clone(&self.db);
        let txn_id = self.snapshot.txn_id;

        // Optimistic pass outside the lock; the locked pass only covers the rest.
        let watermark = db.txn_manager().last_committed();
        if let Err(err) = self.dedup_tables(watermark) {
            return Err(self.abort(err));
        }

        let _commit = db.commit_lock();
        if let Err(err) = db.ensure_healthy() {
            return Err(self.abort(err));
        }
        let commit_ts = match self.prepare(requested) {
            Ok(ts) => ts,
            Err(err) => return Err(self.abort(err)),
        };
        if let Err(err) = db.commit_log().begin(txn_id) {
            return Err(self.abort(err));
        }
        self.logged = true;
        self.state = TxnState::Prepared;

        if let Err(err) = self.apply(commit_ts) {
            return Err(self.fatal(err));
        }
        self.state = TxnState::Committed;
        db.txn_manager().mark_committed(txn_id, commit_ts);
        tracing::debug!(
            "[COMMIT] txn {txn_id} committed at ts {commit_ts} (start {})",
            self.snapshot.start_ts
        );
        Ok(commit_ts)
    }

    fn dedup_tables(&mut self, ts: Timestamp) -> LlkvResult<()> {
        let env = TableEnv {
            storage: self.db.storage(),
            config: &self.db.config().txn,
            snapshot: self.snapshot,
        };
        for table in &mut self.tables {
            table.prepare_dedup(&env, ts)?;
        }
        Ok(())
    }

    /// Assign the prepare timestamp and validate. Must run under the commit lock.
    fn prepare(&mut self, requested: Option<Timestamp>) -> LlkvResult<Timestamp> {
        let start_ts = self.snapshot.start_ts;
        let ts = match requested {
            Some(ts) if ts <= start_ts => {
                return Err(Error::InvalidArgumentError(format!(
                    "commit timestamp {ts} is not after start timestamp {start_ts}"
                )));
            }
            Some(ts) => self.db.txn_manager().reserve_ts(ts)?,
            None => self.db.txn_manager().allocate_ts(),
        };
        self.prepare_ts = Some(ts);
        tracing::debug!(
            "[COMMIT] txn {} preparing at ts {ts} (start {start_ts})",
            self.snapshot.txn_id
        );

        self.dedup_tables(ts)?;
        let env = TableEnv {
            storage: self.db.storage(),
            config: &self.db.config().txn,
            snapshot: self.snapshot,
        };
        for table in &mut self.tables {
            table.prepare_commit(&env, &mut self.checker, ts)?;
        }
        tracing::debug!(
            "[COMMIT CONFLICT CHECK] txn {} validates {} read keys at ts {ts}",
            self.snapshot.txn_id,
            self.checker.len()
        );
        self.checker.check(self.db.storage(), ts)?;
        Ok(ts)
    }

    fn apply(&mut self, commit_ts: Timestamp) -> LlkvResult<()> {
        let txn_id = self.snapshot.txn_id;
        let log = self.db.commit_log();
        let storage = self.db.storage();
        let mut applied = 0;
        for table in &mut self.tables {
            applied += table.apply_commit(log, txn_id, storage, commit_ts)?;
        }
        log.commit(txn_id, commit_ts)?;
        tracing::trace!("[COMMIT] txn {txn_id} applied {applied} entries");
        Ok(())
    }

    /// Roll back after a failure before `Prepared` and hand the error back.
    fn abort(&mut self, err: Error) -> Error {
        tracing::debug!(
            "[ROLLBACK] txn {} aborted during commit: {err}",
            self.snapshot.txn_id
        );
        match self.rollback_inner() {
            Err(fatal) if fatal.is_fatal() => fatal,
            _ => err,
        }
    }

    fn rollback_inner(&mut self) -> LlkvResult<()> {
        let txn_id = self.snapshot.txn_id;
        let db = Arc::clone(&self.db);
        for table in &mut self.tables {
            if let Err(err) = table.rollback(db.storage()) {
                tracing::warn!(
                    "[ROLLBACK] txn {txn_id} stopped at table '{}': {err}",
                    table.table().name()
                );
                break;
            }
        }
        if self.logged
            && let Err(err) = db.commit_log().rollback(txn_id)
        {
            return Err(self.fatal(err));
        }
        self.state = TxnState::RolledBack;
        db.txn_manager().mark_aborted(txn_id);
        tracing::debug!("[ROLLBACK] txn {txn_id} rolled back");
        Ok(())
    }

    /// Turn `err` into a fatal error: log the diagnostic once and poison the
    /// database.
    fn fatal(&mut self, err: Error) -> Error {
        let rendered = self.diagnostic(err.to_string()).to_string();
        tracing::error!("[FATAL] {rendered}");
        self.db.poison(&rendered);
        Error::Fatal(rendered)
    }

    /// Snapshot of this transaction for diagnostics.
    pub fn diagnostic(&self, cause: impl Into<String>) -> FatalDiagnostic {
        let tables = self
            .tables
            .iter()
            .map(|t| TableDiagnostic {
                db: t.table().db(),
                table: t.table().id(),
                name: t.table().name().to_string(),
                pending_rows: t.data().pending_rows(),
                pending_tombstones: t.tombstones().pending_rows(),
                sealed_objects: t.data().sealed().len(),
                sealed_tombstone_objects: t.tombstones().sealed().len(),
                counters: t.counters(),
                entries: t
                    .entries()
                    .describe()
                    .into_iter()
                    .enumerate()
                    .map(|(index, (state, command))| EntryDiagnostic {
                        index,
                        state,
                        command,
                    })
                    .collect(),
            })
            .collect();
        FatalDiagnostic {
            txn_id: self.snapshot.txn_id,
            start_ts: self.snapshot.start_ts,
            prepare_ts: self.prepare_ts,
            state: self.state,
            cause: cause.into(),
            read_set: self.read_set(),
            tables,
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("snapshot", &self.snapshot)
            .field("state", &self.state)
            .field("prepare_ts", &self.prepare_ts)
            .field("tables", &self.tables.len())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxnState::Active
            && let Err(err) = self.rollback_inner()
        {
            tracing::warn!(
                "[ROLLBACK] dropping txn {} failed to roll back: {err}",
                self.snapshot.txn_id
            );
        }
    }
}
