//! Structured snapshot of a transaction that hit an unrecoverable failure.
//!
//! The snapshot is rendered once into the `Error::Fatal` payload and the error
//! log, so an operator can see which entries had been applied when the commit
//! pipeline broke.

use std::fmt;

use llkv_types::{DbId, TableId, Timestamp, TxnId};

use crate::conflict::ReadKey;
use crate::entry::{EntryCommand, EntryState};
use crate::table::TableCounters;
use crate::txn::TxnState;

#[derive(Debug, Clone)]
pub struct EntryDiagnostic {
    pub index: usize,
    pub state: EntryState,
    pub command: EntryCommand,
}

#[derive(Debug, Clone)]
pub struct TableDiagnostic {
    pub db: DbId,
    pub table: TableId,
    pub name: String,
    pub pending_rows: usize,
    pub pending_tombstones: usize,
    pub sealed_objects: usize,
    pub sealed_tombstone_objects: usize,
    pub counters: TableCounters,
    pub entries: Vec<EntryDiagnostic>,
}

#[derive(Debug, Clone)]
pub struct FatalDiagnostic {
    pub txn_id: TxnId,
    pub start_ts: Timestamp,
    pub prepare_ts: Option<Timestamp>,
    pub state: TxnState,
    /// The error that made the failure unrecoverable.
    pub cause: String,
    pub read_set: Vec<ReadKey>,
    pub tables: Vec<TableDiagnostic>,
}

impl fmt::Display for FatalDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "txn {} in state {} (start ts {}, prepare ts ",
            self.txn_id, self.state, self.start_ts
        )?;
        match self.prepare_ts {
            Some(ts) => write!(f, "{ts}")?,
            None => f.write_str("none")?,
        }
        writeln!(f, "): {}", self.cause)?;
        writeln!(f, "  read set ({} keys):", self.read_set.len())?;
        for key in &self.read_set {
            writeln!(
                f,
                "    ({}, {}) {} object {}",
                key.db, key.table, key.kind, key.object
            )?;
        }
        for table in &self.tables {
            writeln!(
                f,
                "  table '{}' ({}, {}): pending rows {}, pending tombstones {}, sealed objects {}/{}, appended {}, deleted {}, transferred {}",
                table.name,
                table.db,
                table.table,
                table.pending_rows,
                table.pending_tombstones,
                table.sealed_objects,
                table.sealed_tombstone_objects,
                table.counters.rows_appended,
                table.counters.rows_deleted,
                table.counters.rows_transferred
            )?;
            for entry in &table.entries {
                writeln!(f, "    #{} {:?} {}", entry.index, entry.state, entry.command)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llkv_types::{DataKind, ObjectId};

    #[test]
    fn test_render_lists_entries_and_read_set() {
        let diagnostic = FatalDiagnostic {
            txn_id: 4,
            start_ts: 10,
            prepare_ts: Some(12),
            state: TxnState::Prepared,
            cause: "commit log has no record of transaction 4".into(),
            read_set: vec![ReadKey {
                db: 1,
                table: 2,
                object: ObjectId::new(3),
                kind: DataKind::Data,
            }],
            tables: vec![TableDiagnostic {
                db: 1,
                table: 2,
                name: "users".into(),
                pending_rows: 0,
                pending_tombstones: 0,
                sealed_objects: 1,
                sealed_tombstone_objects: 0,
                counters: TableCounters::default(),
                entries: vec![EntryDiagnostic {
                    index: 0,
                    state: EntryState::Active,
                    command: EntryCommand::AppendRows {
                        table: 2,
                        kind: DataKind::Data,
                        rows: 5,
                    },
                }],
            }],
        };
        let rendered = diagnostic.to_string();
        assert!(rendered.starts_with("txn 4 in state prepared (start ts 10, prepare ts 12)"));
        assert!(rendered.contains("read set (1 keys)"));
        assert!(rendered.contains("table 'users' (1, 2)"));
        assert!(rendered.contains("#0 Active append 5 data rows to table 2"));
    }
}
