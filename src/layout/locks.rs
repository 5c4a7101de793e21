//! Item-to-line lock registry.
//!
//! External locks pin an item to the line the layout reported for it,
//! until the collection or the snapped average changes. The first and
//! last items are implicitly pinned to the first and last lines; a
//! flag tracks those so clearing them still raises the unlock
//! notification. Internal locks used by the optimizer never live
//! here; they stay inside a single measure pass.

use std::collections::BTreeMap;

use tracing::debug;

/// External item locks (item index -> line index).
#[derive(Debug, Default)]
pub struct LockRegistry {
    locked: BTreeMap<usize, usize>,
    endpoints_locked: bool,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&self) -> &BTreeMap<usize, usize> {
        &self.locked
    }

    pub fn line_of(&self, item_index: usize) -> Option<usize> {
        self.locked.get(&item_index).copied()
    }

    /// True when clearing would observably unlock something.
    pub fn has_any(&self) -> bool {
        self.endpoints_locked || !self.locked.is_empty()
    }

    /// Records that the implicit first/last-item locks are in effect.
    pub fn mark_endpoints_locked(&mut self) {
        self.endpoints_locked = true;
    }

    /// Locks `item_index` to `line_index` and closes the gap to any
    /// adjacent lock on the same line: items sandwiched between two
    /// locks of one line cannot be anywhere else, so they are locked
    /// too.
    pub fn lock(&mut self, item_index: usize, line_index: usize) {
        self.locked.insert(item_index, line_index);

        let previous = self
            .locked
            .range(..item_index)
            .next_back()
            .map(|(item, line)| (*item, *line));
        if let Some((previous_item, previous_line)) = previous {
            if previous_line == line_index {
                for between in previous_item + 1..item_index {
                    self.locked.insert(between, line_index);
                }
            }
        }

        let next = self
            .locked
            .range(item_index + 1..)
            .next()
            .map(|(item, line)| (*item, *line));
        if let Some((next_item, next_line)) = next {
            if next_line == line_index {
                for between in item_index + 1..next_item {
                    self.locked.insert(between, line_index);
                }
            }
        }

        debug!(item_index, line_index, total = self.locked.len(), "item locked to line");
    }

    /// Drops every lock. Returns true when anything (including the
    /// implicit endpoint locks) was held, so the caller can raise the
    /// items-unlocked event.
    pub fn clear(&mut self) -> bool {
        let had_any = self.has_any();
        self.locked.clear();
        self.endpoints_locked = false;
        had_any
    }
}
