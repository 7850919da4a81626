//! Known-id bookkeeping for the change detector
//!
//! Sets only grow. A sub-item is marked known in the same critical section
//! that runs its filter, so no sub-item can be reported twice.

use parking_lot::Mutex;
use std::collections::HashSet;

/// Result of offering a sub-item to the known set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Seen before; filters were not evaluated
    AlreadyKnown,
    /// New, now known, filters rejected it
    Rejected,
    /// New, now known, every filter passed
    Matched,
}

#[derive(Default)]
struct KnownState {
    items: HashSet<u64>,
    sub_items: HashSet<(u64, u64)>,
}

#[derive(Default)]
pub struct KnownItemSet {
    state: Mutex<KnownState>,
}

impl KnownItemSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a top-level id; true if it was new
    pub fn mark_item(&self, item_id: u64) -> bool {
        self.state.lock().items.insert(item_id)
    }

    /// Mark a sub-item without evaluating anything; true if it was new
    pub fn mark_sub_item_if_new(&self, item_id: u64, sub_item_id: u64) -> bool {
        self.state.lock().sub_items.insert((item_id, sub_item_id))
    }

    /// Mark the sub-item known, then evaluate `passes` if it was new
    pub fn admit(&self, item_id: u64, sub_item_id: u64, passes: impl FnOnce() -> bool) -> Admission {
        let mut state = self.state.lock();
        if !state.sub_items.insert((item_id, sub_item_id)) {
            return Admission::AlreadyKnown;
        }
        if passes() {
            Admission::Matched
        } else {
            Admission::Rejected
        }
    }

    pub fn contains_sub_item(&self, item_id: u64, sub_item_id: u64) -> bool {
        self.state.lock().sub_items.contains(&(item_id, sub_item_id))
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.items.is_empty() && state.sub_items.is_empty()
    }

    /// `(items, sub_items)`
    pub fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.items.len(), state.sub_items.len())
    }
}
