//! Transfer pages: where rows of a merged-away object went.
//!
//! When a merge relocates rows it publishes one [`TransferPage`] per consumed
//! object. Deletes prepared against the old object resolve their targets through
//! the page. Pages are pinned while in use and evicted once unpinned for longer
//! than the table's TTL; a resolution attempted after eviction cannot succeed.
//!
//! Pages live in an arena of generation-tagged slots. A [`PinnedPage`] remembers
//! the slot and generation it pinned, so releasing a guard can never touch a slot
//! that was recycled for another page.

use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use llkv_types::{ObjectId, RowIdentity, Timestamp};
use rustc_hash::FxHashMap;

/// Mapping from `(block, offset)` in one source object to the row's new identity.
#[derive(Debug, Clone)]
pub struct TransferPage {
    source: ObjectId,
    merged_at: Timestamp,
    rows: FxHashMap<(u32, u32), RowIdentity>,
}

impl TransferPage {
    pub fn new(source: ObjectId, merged_at: Timestamp) -> Self {
        Self {
            source,
            merged_at,
            rows: FxHashMap::default(),
        }
    }

    pub fn insert(&mut self, block: u32, offset: u32, to: RowIdentity) {
        self.rows.insert((block, offset), to);
    }

    pub fn source(&self) -> ObjectId {
        self.source
    }

    pub fn merged_at(&self) -> Timestamp {
        self.merged_at
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// New identity of `old`; `None` when the row was not carried over.
    pub fn transfer(&self, old: &RowIdentity) -> Option<RowIdentity> {
        if old.object != self.source {
            return None;
        }
        self.rows.get(&(old.block, old.offset)).copied()
    }
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    page: Option<Arc<TransferPage>>,
    pins: usize,
    touched: Instant,
}

#[derive(Debug, Default)]
struct TransferState {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_object: FxHashMap<ObjectId, usize>,
}

impl TransferState {
    fn evict_slot(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        if let Some(page) = slot.page.take() {
            slot.generation += 1;
            self.by_object.remove(&page.source);
            self.free.push(idx);
            tracing::trace!("[TRANSFER] evicted page for object {}", page.source);
        }
    }
}

#[derive(Debug)]
struct TransferShared {
    ttl: Duration,
    state: Mutex<TransferState>,
}

impl TransferShared {
    fn unpin(&self, slot: usize, generation: u64) {
        let mut state = self.state.lock().expect("transfer table lock poisoned");
        if let Some(s) = state.slots.get_mut(slot)
            && s.generation == generation
        {
            s.pins = s.pins.saturating_sub(1);
            s.touched = Instant::now();
        }
    }
}

/// Shared, TTL-bounded registry of transfer pages keyed by source object.
#[derive(Debug, Clone)]
pub struct TransferTable {
    shared: Arc<TransferShared>,
}

impl TransferTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            shared: Arc::new(TransferShared {
                ttl,
                state: Mutex::new(TransferState::default()),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.shared.ttl
    }

    /// Publish a page. Expired unpinned pages are evicted opportunistically.
    pub fn add_page(&self, page: TransferPage) {
        let now = Instant::now();
        self.evict_expired_at(now);
        let mut state = self.shared.state.lock().expect("transfer table lock poisoned");
        if let Some(&old) = state.by_object.get(&page.source) {
            // A source is merged at most once; a stale slot is simply replaced.
            state.evict_slot(old);
        }
        let source = page.source;
        let page = Arc::new(page);
        let idx = match state.free.pop() {
            Some(idx) => {
                let slot = &mut state.slots[idx];
                slot.page = Some(page);
                slot.pins = 0;
                slot.touched = now;
                idx
            }
            None => {
                state.slots.push(Slot {
                    generation: 0,
                    page: Some(page),
                    pins: 0,
                    touched: now,
                });
                state.slots.len() - 1
            }
        };
        state.by_object.insert(source, idx);
        tracing::trace!("[TRANSFER] published page for object {source} in slot {idx}");
    }

    /// Pin the page of `object`; `None` when it was never published or was evicted.
    pub fn pin(&self, object: ObjectId) -> Option<PinnedPage> {
        let mut state = self.shared.state.lock().expect("transfer table lock poisoned");
        let idx = *state.by_object.get(&object)?;
        let slot = &mut state.slots[idx];
        let page = Arc::clone(slot.page.as_ref()?);
        slot.pins += 1;
        slot.touched = Instant::now();
        Some(PinnedPage {
            shared: Arc::clone(&self.shared),
            slot: idx,
            generation: slot.generation,
            page,
        })
    }

    /// Evict every unpinned page idle for at least the TTL as of `now`.
    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let ttl = self.shared.ttl;
        let mut state = self.shared.state.lock().expect("transfer table lock poisoned");
        let expired: Vec<usize> = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                s.page.is_some() && s.pins == 0 && now.saturating_duration_since(s.touched) >= ttl
            })
            .map(|(idx, _)| idx)
            .collect();
        for &idx in &expired {
            state.evict_slot(idx);
        }
        expired.len()
    }

    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    /// Evict the page of `object` now; refused while pinned.
    pub fn evict(&self, object: ObjectId) -> bool {
        let mut state = self.shared.state.lock().expect("transfer table lock poisoned");
        match state.by_object.get(&object).copied() {
            Some(idx) if state.slots[idx].pins == 0 => {
                state.evict_slot(idx);
                true
            }
            _ => false,
        }
    }

    /// Number of live pins on `object`'s page, `None` when no page is present.
    pub fn pin_count(&self, object: ObjectId) -> Option<usize> {
        let state = self.shared.state.lock().expect("transfer table lock poisoned");
        state
            .by_object
            .get(&object)
            .map(|&idx| state.slots[idx].pins)
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.shared
            .state
            .lock()
            .expect("transfer table lock poisoned")
            .by_object
            .contains_key(&object)
    }

    pub fn len(&self) -> usize {
        self.shared
            .state
            .lock()
            .expect("transfer table lock poisoned")
            .by_object
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A pinned transfer page. The pin is released when the guard is dropped.
#[derive(Debug)]
pub struct PinnedPage {
    shared: Arc<TransferShared>,
    slot: usize,
    generation: u64,
    page: Arc<TransferPage>,
}

impl Deref for PinnedPage {
    type Target = TransferPage;

    fn deref(&self) -> &TransferPage {
        &self.page
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        self.shared.unpin(self.slot, self.generation);
    }
}
