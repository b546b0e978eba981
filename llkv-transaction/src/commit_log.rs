//! Commit log contract and the in-memory implementation.
//!
//! A transaction is recorded with [`CommitLog::begin`] once it is prepared. Each
//! entry applied afterwards is logged with [`CommitLog::add_command`], which hands
//! back the entry's commit sequence number. [`CommitLog::commit`] closes the record.

use std::sync::Mutex;

use llkv_result::{Error, Result as LlkvResult};
use llkv_types::{Timestamp, TxnId};
use rustc_hash::FxHashMap;

use crate::entry::EntryCommand;

/// Commit sequence number: per-transaction position of an applied entry.
pub type Csn = u64;

pub trait CommitLog: Send + Sync {
    fn begin(&self, txn_id: TxnId) -> LlkvResult<()>;

    /// Log one entry of a prepared transaction and return its CSN.
    ///
    /// CSNs start at 1 and increase by one per call for the same transaction.
    fn add_command(&self, txn_id: TxnId, command: &EntryCommand) -> LlkvResult<Csn>;

    fn commit(&self, txn_id: TxnId, commit_ts: Timestamp) -> LlkvResult<()>;

    fn rollback(&self, txn_id: TxnId) -> LlkvResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogState {
    Prepared,
    Committed(Timestamp),
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub state: LogState,
    /// Rendered commands in CSN order; `commands[i]` has CSN `i + 1`.
    pub commands: Vec<String>,
}

/// Commit log kept in memory.
#[derive(Debug, Default)]
pub struct MemCommitLog {
    records: Mutex<FxHashMap<TxnId, LogRecord>>,
}

impl MemCommitLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, txn_id: TxnId) -> Option<LogRecord> {
        self.records
            .lock()
            .expect("commit log lock poisoned")
            .get(&txn_id)
            .cloned()
    }

    /// Drop every trace of a transaction, as if its record had been lost.
    pub fn forget(&self, txn_id: TxnId) -> bool {
        self.records
            .lock()
            .expect("commit log lock poisoned")
            .remove(&txn_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("commit log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_prepared<T>(
        &self,
        txn_id: TxnId,
        f: impl FnOnce(&mut LogRecord) -> T,
    ) -> LlkvResult<T> {
        let mut records = self.records.lock().expect("commit log lock poisoned");
        let record = records.get_mut(&txn_id).ok_or_else(|| {
            Error::Internal(format!("commit log has no record of transaction {txn_id}"))
        })?;
        if record.state != LogState::Prepared {
            return Err(Error::Internal(format!(
                "transaction {txn_id} is {:?} in the commit log, expected Prepared",
                record.state
            )));
        }
        Ok(f(record))
    }
}

impl CommitLog for MemCommitLog {
    fn begin(&self, txn_id: TxnId) -> LlkvResult<()> {
        let mut records = self.records.lock().expect("commit log lock poisoned");
        if records.contains_key(&txn_id) {
            return Err(Error::Internal(format!(
                "transaction {txn_id} is already in the commit log"
            )));
        }
        records.insert(
            txn_id,
            LogRecord {
                state: LogState::Prepared,
                commands: Vec::new(),
            },
        );
        Ok(())
    }

    fn add_command(&self, txn_id: TxnId, command: &EntryCommand) -> LlkvResult<Csn> {
        self.with_prepared(txn_id, |record| {
            record.commands.push(command.to_string());
            record.commands.len() as Csn
        })
    }

    fn commit(&self, txn_id: TxnId, commit_ts: Timestamp) -> LlkvResult<()> {
        self.with_prepared(txn_id, |record| {
            record.state = LogState::Committed(commit_ts);
        })
    }

    fn rollback(&self, txn_id: TxnId) -> LlkvResult<()> {
        self.with_prepared(txn_id, |record| {
            record.state = LogState::RolledBack;
        })
    }
}
