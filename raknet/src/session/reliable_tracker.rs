use std::collections::VecDeque;

use crate::protocol::types::Sequence24;

/// Remembers which reliable indices were already accepted so resent
/// fragments are delivered once.
///
/// Everything before `base` has been seen; `seen[i]` covers `base + i`.
pub struct ReliableTracker {
    base: Sequence24,
    seen: VecDeque<bool>,
    window: u32,
}

impl ReliableTracker {
    pub fn new(window: u32) -> Self {
        Self {
            base: Sequence24::new(0),
            seen: VecDeque::new(),
            window: window.max(1),
        }
    }

    /// Records `index` and reports whether it is new.
    ///
    /// Indices more than `window` ahead of the oldest gap are let through
    /// without being recorded.
    pub fn insert(&mut self, index: Sequence24) -> bool {
        if index < self.base {
            return false;
        }
        let offset = self.base.distance_to(index);
        if offset >= self.window {
            tracing::trace!(event = "reliable_index_beyond_window", index = index.value());
            return true;
        }

        let offset = offset as usize;
        if self.seen.len() <= offset {
            self.seen.resize(offset + 1, false);
        }
        if self.seen[offset] {
            return false;
        }
        self.seen[offset] = true;

        while self.seen.front() == Some(&true) {
            self.seen.pop_front();
            self.base = self.base.next();
        }
        true
    }

    /// Whether `index` was already recorded.
    pub fn contains(&self, index: Sequence24) -> bool {
        if index < self.base {
            return true;
        }
        let offset = self.base.distance_to(index);
        offset < self.window && self.seen.get(offset as usize) == Some(&true)
    }

    /// Lowest index not yet seen.
    pub fn base(&self) -> Sequence24 {
        self.base
    }
}
