//! Transaction tables for LLKV: MVCC, primary-key dedup, tombstones, delete
//! transfer and the two-phase commit pipeline.
//!
//! # Key Concepts
//!
//! - **Timestamps**: one clock per [`Database`]. A transaction reads at its start
//!   timestamp (the committed watermark when it began) and commits at the
//!   timestamp assigned when it prepares.
//! - **Staging areas**: every [`Transaction`] stages its writes privately per
//!   table and lineage (row data or tombstones), sealing large batches into
//!   objects nobody else can see until commit.
//! - **Dedup tiers**: primary keys are checked against the batch, the staging
//!   area, the committed snapshot and rows committed while the transaction was
//!   open; [`DedupPolicy`] chooses which tiers run at append and which at prepare.
//! - **Delete transfer**: deletes target row identities, which merges change. At
//!   prepare, deletes whose object was merged away follow the merge's transfer
//!   pages to the rows' new identities.
//! - **Conflicts**: every object a delete targets is recorded by the
//!   [`RwChecker`] and must still be live at the prepare timestamp.
//!
//! # Lifecycle
//!
//! `Active -> Preparing -> Prepared -> Committed`. Any failure before `Prepared`
//! rolls the transaction back and returns the error. Failures after `Prepared`
//! are fatal: they produce a [`FatalDiagnostic`] and poison the database.
#![forbid(unsafe_code)]

pub mod commit_log;
pub mod config;
pub mod conflict;
pub mod database;
pub mod dedup;
pub mod diagnostics;
pub mod entry;
pub mod mvcc;
pub mod table;
pub mod transfer;
pub mod txn;
pub mod workspace;

pub use commit_log::{CommitLog, Csn, LogRecord, LogState, MemCommitLog};
pub use config::{DatabaseConfig, DedupPolicy, TxnConfig};
pub use conflict::{Liveness, ReadKey, RwChecker};
pub use database::Database;
pub use diagnostics::FatalDiagnostic;
pub use entry::{EntryCommand, EntryState, TxnEntry};
pub use mvcc::{TXN_ID_NONE, TransactionSnapshot, TxnIdManager, TxnStatus};
pub use txn::{Transaction, TxnState};
