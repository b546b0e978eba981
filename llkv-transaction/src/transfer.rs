//! Following relocated rows through transfer pages.
//!
//! A row identity whose object was dropped by a merge is resolved page by page
//! until it lands on an object that is live at the resolution timestamp. Every
//! page touched stays pinned in the resolver's map until the resolver is
//! dropped, so a page cannot be evicted between two lookups of the same call.

use llkv_result::Result as LlkvResult;
use llkv_storage::{PinnedPage, Storage, TableEntry};
use llkv_types::{ObjectId, RowIdentity, Timestamp};
use rustc_hash::FxHashMap;

use crate::conflict::{Liveness, RwChecker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The row lives here at the resolution timestamp.
    Landed { row: RowIdentity, hops: usize },
    /// The object was dropped but its transfer page is gone.
    PageMissing(ObjectId),
    /// The page of this object has no entry for the row: the merge removed it.
    RowMissing(ObjectId),
    /// The object is unknown to the table.
    ObjectMissing(ObjectId),
    /// Still on a dropped object after the hop limit.
    Exhausted,
}

pub struct ChainResolver<'a> {
    storage: &'a Storage,
    table: &'a TableEntry,
    as_of: Timestamp,
    max_hops: usize,
    pins: FxHashMap<ObjectId, PinnedPage>,
}

impl<'a> ChainResolver<'a> {
    pub fn new(
        storage: &'a Storage,
        table: &'a TableEntry,
        as_of: Timestamp,
        max_hops: usize,
    ) -> Self {
        Self {
            storage,
            table,
            as_of,
            max_hops,
            pins: FxHashMap::default(),
        }
    }

    pub fn pinned(&self) -> usize {
        self.pins.len()
    }

    pub fn resolve(&mut self, row: RowIdentity) -> LlkvResult<Resolution> {
        let mut current = row;
        let mut hops = 0;
        loop {
            match RwChecker::liveness(self.table, current.object, self.as_of) {
                Liveness::Live => return Ok(Resolution::Landed { row: current, hops }),
                Liveness::Missing => return Ok(Resolution::ObjectMissing(current.object)),
                Liveness::Dropped(_) => {}
            }
            if hops == self.max_hops {
                return Ok(Resolution::Exhausted);
            }
            let object = current.object;
            if !self.pins.contains_key(&object) {
                let Some(page) = self.storage.transfer_table().pin(object) else {
                    tracing::debug!("[TRANSFER] no transfer page for dropped object {object}");
                    return Ok(Resolution::PageMissing(object));
                };
                self.pins.insert(object, page);
            }
            let next = self.pins.get(&object).and_then(|page| page.transfer(&current));
            match next {
                Some(next) => {
                    tracing::trace!("[TRANSFER] {current} -> {next}");
                    current = next;
                    hops += 1;
                }
                None => return Ok(Resolution::RowMissing(object)),
            }
        }
    }
}
