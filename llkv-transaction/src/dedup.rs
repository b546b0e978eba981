//! Primary-key dedup against committed data.
//!
//! Staged keys are probed against committed rows in a [`ScanWindow`]: the
//! snapshot at the transaction's start (at append), the snapshot at prepare
//! (deferred policy) or the rows committed by others since the last check
//! (incremental). A match only counts if no tombstone in the window hides it
//! and the transaction has not deleted the row itself. Matches on objects that
//! a merge dropped inside the window are followed to their new identity first;
//! a match that cannot be followed fails the check with a retryable conflict.

use llkv_result::{Error, Result as LlkvResult};
use llkv_storage::{PkValue, ScanWindow, Storage, TableEntry, find_deletes, find_pk_rows};
use llkv_types::{RowIdentity, Timestamp};
use rustc_hash::FxHashSet;

use crate::transfer::{ChainResolver, Resolution};

/// First of `keys` that already holds a live committed row in `window`.
///
/// `own_deletes` are row identities tombstoned by the probing transaction.
pub fn find_committed_duplicate(
    storage: &Storage,
    table: &TableEntry,
    keys: &[PkValue],
    window: ScanWindow,
    own_deletes: &FxHashSet<RowIdentity>,
    max_hops: usize,
) -> LlkvResult<Option<PkValue>> {
    if keys.is_empty() {
        return Ok(None);
    }
    let matches: Vec<_> = find_pk_rows(storage, table, keys, window)?
        .into_iter()
        .filter(|m| !own_deletes.contains(&m.row))
        .collect();
    if matches.is_empty() {
        return Ok(None);
    }

    let (from, to) = window.delete_range();
    let match_keys: Vec<PkValue> = matches.iter().map(|m| keys[m.key_index].clone()).collect();
    let match_rows: Vec<RowIdentity> = matches.iter().map(|m| m.row).collect();
    let deleted = find_deletes(storage, table, &match_keys, &match_rows, from, to)?;

    let mut resolver = ChainResolver::new(storage, table, to, max_hops);
    for (pos, (key, row)) in match_keys.iter().zip(&match_rows).enumerate() {
        if deleted.contains(pos as u32) {
            continue;
        }
        let dropped = table
            .get_object_by_id(row.object)
            .is_some_and(|entry| entry.dropped_by(to));
        if !dropped {
            tracing::debug!(
                "[DEDUP] table '{}' key {key} already committed at {row} ({window:?})",
                table.name()
            );
            return Ok(Some(key.clone()));
        }
        // Merged away inside the window: the row may have been deleted under
        // its new identity.
        match resolver.resolve(*row)? {
            Resolution::Landed { row: moved, .. } => {
                if own_deletes.contains(&moved) {
                    continue;
                }
                let hidden = find_deletes(
                    storage,
                    table,
                    std::slice::from_ref(key),
                    &[moved],
                    from,
                    to,
                )?;
                if hidden.is_empty() {
                    tracing::debug!(
                        "[DEDUP] table '{}' key {key} already committed at {moved} (moved from {row})",
                        table.name()
                    );
                    return Ok(Some(key.clone()));
                }
            }
            Resolution::RowMissing(_) => {
                // The merge only removes rows deleted at or before its timestamp.
                continue;
            }
            Resolution::PageMissing(object) => {
                return Err(Error::ReadWriteConflict(format!(
                    "transfer page of object {object} is gone; committed key {key} at {row} cannot be followed"
                )));
            }
            Resolution::ObjectMissing(object) => {
                return Err(Error::ReadWriteConflict(format!(
                    "object {object} is unknown to table '{}'; committed key {key} at {row} cannot be followed",
                    table.name()
                )));
            }
            Resolution::Exhausted => {
                return Err(Error::WriteWriteConflict(format!(
                    "committed key {key} at {row} did not land within {max_hops} transfer hops"
                )));
            }
        }
    }
    Ok(None)
}

/// `rows` plus the identity each one was relocated to as of `as_of`, when it
/// can still be followed.
pub fn with_relocations(
    storage: &Storage,
    table: &TableEntry,
    rows: impl IntoIterator<Item = RowIdentity>,
    as_of: Timestamp,
    max_hops: usize,
) -> LlkvResult<FxHashSet<RowIdentity>> {
    let mut resolver = ChainResolver::new(storage, table, as_of, max_hops);
    let mut out = FxHashSet::default();
    for row in rows {
        out.insert(row);
        if let Resolution::Landed { row: moved, hops } = resolver.resolve(row)?
            && hops > 0
        {
            out.insert(moved);
        }
    }
    Ok(out)
}
