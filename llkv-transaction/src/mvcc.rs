//! Transaction ids, the commit clock and transaction status tracking.
//!
//! One [`TxnIdManager`] per database hands out transaction ids and timestamps
//! from a single monotonically increasing clock. A transaction reads at its
//! start timestamp and commits at the timestamp assigned when it prepares;
//! visibility everywhere is a comparison of those two numbers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use llkv_result::{Error, Result as LlkvResult};
use llkv_types::{Timestamp, TxnId};
use rustc_hash::FxHashMap;

/// Transaction ID representing "no transaction".
pub const TXN_ID_NONE: TxnId = TxnId::MAX;

/// First transaction ID handed out.
pub const TXN_ID_MIN: TxnId = 1;

/// Internal state shared across manager handles.
#[derive(Debug)]
struct TxnIdManagerInner {
    /// Next transaction ID to allocate.
    next_txn_id: AtomicU64,
    /// Last timestamp handed out for a start, prepare or merge.
    clock: AtomicU64,
    /// Largest fully applied commit timestamp (snapshot watermark).
    last_committed: AtomicU64,
    /// Highest start timestamp handed out.
    max_start: AtomicU64,
    /// Tracking map for transaction statuses.
    statuses: Mutex<FxHashMap<TxnId, TxnStatus>>,
}

/// Transaction ID and timestamp manager.
#[derive(Clone, Debug)]
pub struct TxnIdManager {
    inner: Arc<TxnIdManagerInner>,
}

impl TxnIdManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TxnIdManagerInner {
                next_txn_id: AtomicU64::new(TXN_ID_MIN),
                clock: AtomicU64::new(0),
                last_committed: AtomicU64::new(0),
                max_start: AtomicU64::new(0),
                statuses: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    /// Begin a new transaction reading at the committed watermark.
    ///
    /// Every commit at or below the watermark is fully applied, so the snapshot
    /// never observes a half-applied transaction.
    pub fn begin_transaction(&self) -> TransactionSnapshot {
        let start_ts = self.inner.last_committed.load(Ordering::SeqCst);
        self.register(start_ts)
    }

    /// Begin a new transaction reading at an explicit timestamp.
    ///
    /// The clock is advanced to at least `start_ts`, so later commits are
    /// ordered after it.
    pub fn begin_transaction_at(&self, start_ts: Timestamp) -> TransactionSnapshot {
        self.inner.clock.fetch_max(start_ts, Ordering::SeqCst);
        self.register(start_ts)
    }

    fn register(&self, start_ts: Timestamp) -> TransactionSnapshot {
        self.inner.max_start.fetch_max(start_ts, Ordering::SeqCst);
        let txn_id = self.inner.next_txn_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .statuses
            .lock()
            .expect("txn status lock poisoned")
            .insert(txn_id, TxnStatus::Active);
        TransactionSnapshot { txn_id, start_ts }
    }

    /// Allocate the next timestamp.
    pub fn allocate_ts(&self) -> Timestamp {
        self.inner.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Claim a caller-chosen commit timestamp.
    ///
    /// Commits are serialized, so `ts` must be newer than the last commit and
    /// than every start timestamp handed out. The clock is advanced past it.
    pub fn reserve_ts(&self, ts: Timestamp) -> LlkvResult<Timestamp> {
        let last = self.last_committed();
        if ts <= last {
            return Err(Error::InvalidArgumentError(format!(
                "commit timestamp {ts} does not advance past last commit {last}"
            )));
        }
        let max_start = self.inner.max_start.load(Ordering::SeqCst);
        if ts <= max_start {
            return Err(Error::InvalidArgumentError(format!(
                "commit timestamp {ts} does not advance past start timestamp {max_start}"
            )));
        }
        self.inner.clock.fetch_max(ts, Ordering::SeqCst);
        Ok(ts)
    }

    /// Return the status for a given transaction ID.
    pub fn status(&self, txn_id: TxnId) -> TxnStatus {
        if txn_id == TXN_ID_NONE {
            return TxnStatus::None;
        }
        let guard = self
            .inner
            .statuses
            .lock()
            .expect("txn status lock poisoned");
        guard.get(&txn_id).copied().unwrap_or(TxnStatus::None)
    }

    /// Mark a transaction as committed at `commit_ts` and advance the watermark.
    pub fn mark_committed(&self, txn_id: TxnId, commit_ts: Timestamp) {
        self.inner
            .statuses
            .lock()
            .expect("txn status lock poisoned")
            .insert(txn_id, TxnStatus::Committed);
        self.advance_committed(commit_ts);
    }

    /// Advance the watermark after a commit or merge at `ts` finished applying.
    pub fn advance_committed(&self, ts: Timestamp) {
        self.inner.last_committed.fetch_max(ts, Ordering::SeqCst);
        self.inner.clock.fetch_max(ts, Ordering::SeqCst);
    }

    /// Mark a transaction as aborted.
    pub fn mark_aborted(&self, txn_id: TxnId) {
        self.inner
            .statuses
            .lock()
            .expect("txn status lock poisoned")
            .insert(txn_id, TxnStatus::Aborted);
    }

    /// Return the latest committed timestamp (snapshot watermark).
    pub fn last_committed(&self) -> Timestamp {
        self.inner.last_committed.load(Ordering::SeqCst)
    }

    /// Return the last timestamp handed out.
    pub fn current_ts(&self) -> Timestamp {
        self.inner.clock.load(Ordering::SeqCst)
    }
}

impl Default for TxnIdManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction metadata captured when a transaction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSnapshot {
    /// The unique ID assigned to this transaction.
    pub txn_id: TxnId,
    /// Read timestamp: everything committed at or before it is visible.
    pub start_ts: Timestamp,
}

/// Transaction status values tracked by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    Committed,
    Aborted,
    None,
}

impl TxnStatus {
    pub fn is_committed(self) -> bool {
        matches!(self, TxnStatus::Committed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, TxnStatus::Active)
    }

    pub fn is_aborted(self) -> bool {
        matches!(self, TxnStatus::Aborted)
    }
}
