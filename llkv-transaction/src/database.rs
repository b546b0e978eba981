use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use llkv_result::{Error, Result as LlkvResult};
use llkv_storage::{
    CommittedTombstone, MergeOutcome, ScanBatch, Storage, TableSchema, merge_objects,
    scan_tombstones, scan_visible,
};
use llkv_types::{DbId, ObjectId, TableId, Timestamp};
use rustc_hash::FxHashSet;

use crate::commit_log::{CommitLog, MemCommitLog};
use crate::config::DatabaseConfig;
use crate::mvcc::TxnIdManager;
use crate::txn::Transaction;

/// Owns the storage collaborators, the commit clock and the commit log.
///
/// Commit validation and apply run under one commit lock, as do merges.
/// Everything else runs concurrently.
pub struct Database {
    storage: Storage,
    txn_manager: TxnIdManager,
    commit_log: Arc<dyn CommitLog>,
    config: DatabaseConfig,
    commit_lock: Mutex<()>,
    poisoned: AtomicBool,
    fatal: Mutex<Option<String>>,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Arc<Self> {
        Self::with_commit_log(config, Arc::new(MemCommitLog::new()))
    }

    pub fn with_commit_log(config: DatabaseConfig, commit_log: Arc<dyn CommitLog>) -> Arc<Self> {
        Arc::new(Self {
            storage: Storage::new(config.storage.clone()),
            txn_manager: TxnIdManager::new(),
            commit_log,
            config,
            commit_lock: Mutex::new(()),
            poisoned: AtomicBool::new(false),
            fatal: Mutex::new(None),
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn txn_manager(&self) -> &TxnIdManager {
        &self.txn_manager
    }

    pub fn commit_log(&self) -> &dyn CommitLog {
        self.commit_log.as_ref()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn last_committed(&self) -> Timestamp {
        self.txn_manager.last_committed()
    }

    pub fn create_table(&self, db: DbId, schema: TableSchema) -> LlkvResult<TableId> {
        self.ensure_healthy()?;
        Ok(self.storage.create_table(db, schema)?.id())
    }

    /// Begin a transaction reading the latest fully committed state.
    pub fn begin(self: &Arc<Self>) -> LlkvResult<Transaction> {
        self.ensure_healthy()?;
        let snapshot = self.txn_manager.begin_transaction();
        tracing::debug!(
            "[BEGIN] txn {} starts at ts {}",
            snapshot.txn_id,
            snapshot.start_ts
        );
        Ok(Transaction::new(Arc::clone(self), snapshot))
    }

    /// Begin a transaction reading as of `start_ts`.
    pub fn begin_at(self: &Arc<Self>, start_ts: Timestamp) -> LlkvResult<Transaction> {
        self.ensure_healthy()?;
        let snapshot = self.txn_manager.begin_transaction_at(start_ts);
        tracing::debug!(
            "[BEGIN] txn {} starts at explicit ts {start_ts}",
            snapshot.txn_id
        );
        Ok(Transaction::new(Arc::clone(self), snapshot))
    }

    /// Merge `sources` at a freshly allocated timestamp.
    pub fn merge_objects(
        &self,
        db: DbId,
        table: TableId,
        sources: &[ObjectId],
    ) -> LlkvResult<MergeOutcome> {
        self.merge_inner(db, table, sources, None)
    }

    /// Merge `sources` at `merged_at`, which must be after every commit.
    pub fn merge_objects_at(
        &self,
        db: DbId,
        table: TableId,
        sources: &[ObjectId],
        merged_at: Timestamp,
    ) -> LlkvResult<MergeOutcome> {
        self.merge_inner(db, table, sources, Some(merged_at))
    }

    fn merge_inner(
        &self,
        db: DbId,
        table: TableId,
        sources: &[ObjectId],
        requested: Option<Timestamp>,
    ) -> LlkvResult<MergeOutcome> {
        self.ensure_healthy()?;
        let entry = self.storage.table(db, table)?;
        let _commit = self.commit_lock();
        let merged_at = match requested {
            Some(ts) => self.txn_manager.reserve_ts(ts)?,
            None => self.txn_manager.allocate_ts(),
        };
        let outcome = merge_objects(&self.storage, &entry, sources, merged_at)?;
        self.txn_manager.advance_committed(merged_at);
        Ok(outcome)
    }

    /// Committed rows of a table visible at `ts`.
    pub fn scan_at(&self, db: DbId, table: TableId, ts: Timestamp) -> LlkvResult<Vec<ScanBatch>> {
        let entry = self.storage.table(db, table)?;
        scan_visible(&self.storage, &entry, ts, &FxHashSet::default())
    }

    /// Committed tombstones of a table visible at `ts`.
    pub fn scan_tombstones_at(
        &self,
        db: DbId,
        table: TableId,
        ts: Timestamp,
    ) -> LlkvResult<Vec<CommittedTombstone>> {
        let entry = self.storage.table(db, table)?;
        scan_tombstones(&self.storage, &entry, ts)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// The rendered diagnostic that poisoned the database.
    pub fn fatal_diagnostic(&self) -> Option<String> {
        self.fatal.lock().expect("fatal diagnostic lock poisoned").clone()
    }

    pub(crate) fn ensure_healthy(&self) -> LlkvResult<()> {
        if !self.is_poisoned() {
            return Ok(());
        }
        let detail = self
            .fatal_diagnostic()
            .unwrap_or_else(|| "unknown failure".to_string());
        Err(Error::Fatal(format!(
            "database refuses work after a fatal failure: {detail}"
        )))
    }

    pub(crate) fn poison(&self, rendered: &str) {
        let mut fatal = self.fatal.lock().expect("fatal diagnostic lock poisoned");
        if fatal.is_none() {
            *fatal = Some(rendered.to_string());
        }
        self.poisoned.store(true, Ordering::SeqCst);
    }

    pub(crate) fn commit_lock(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock().expect("commit lock poisoned")
    }
}
