use std::collections::VecDeque;

// ============================================================================
// SNAPSHOT HISTORY
// ============================================================================

/// State that can be stored as a history entry.  Entries are full,
/// independent copies; equality is structural.
pub trait HistoryState: Clone + PartialEq {
    /// Approximate heap footprint, used for the memory cap.
    fn memory_size(&self) -> usize;
}

#[derive(Clone, Debug)]
pub struct HistoryEntry<S> {
    /// Action that produced this state ("Move", "Merge Layers", ...).
    pub description: String,
    pub state: S,
}

/// Linear snapshot history: a sequence of entries plus a cursor.  Entry 0 is
/// the document's initial state, so `index` is always a valid position.
/// Committing after an undo discards the redo branch.
pub struct HistoryManager<S: HistoryState> {
    entries: VecDeque<HistoryEntry<S>>,
    index: usize,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across all entries.
    total_memory: usize,
}

impl<S: HistoryState> HistoryManager<S> {
    pub fn new(initial: S, max_history_size: usize) -> Self {
        let total_memory = initial.memory_size();
        let mut entries = VecDeque::new();
        entries.push_back(HistoryEntry { description: "Open".to_string(), state: initial });
        Self {
            entries,
            index: 0,
            max_history_size: max_history_size.max(1),
            max_memory_bytes: Some(256 * 1024 * 1024),
            total_memory,
        }
    }

    pub fn set_max_memory_bytes(&mut self, max: Option<usize>) {
        self.max_memory_bytes = max;
        self.prune();
    }

    /// Append `state` unless it equals the current entry.  Returns whether an
    /// entry was added.
    pub fn commit(&mut self, description: impl Into<String>, state: S) -> bool {
        if self.current() == &state {
            return false;
        }

        while self.entries.len() > self.index + 1 {
            if let Some(dropped) = self.entries.pop_back() {
                self.total_memory = self.total_memory.saturating_sub(dropped.state.memory_size());
            }
        }

        self.total_memory += state.memory_size();
        self.entries.push_back(HistoryEntry { description: description.into(), state });
        self.index = self.entries.len() - 1;
        self.prune();
        true
    }

    /// Step back; `None` (and no change) at the oldest entry.
    pub fn undo(&mut self) -> Option<&S> {
        if !self.can_undo() {
            return None;
        }
        self.index -= 1;
        Some(&self.entries[self.index].state)
    }

    /// Step forward; `None` (and no change) at the newest entry.
    pub fn redo(&mut self) -> Option<&S> {
        if !self.can_redo() {
            return None;
        }
        self.index += 1;
        Some(&self.entries[self.index].state)
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    pub fn current(&self) -> &S {
        &self.entries[self.index].state
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Description of the action `undo` would revert.
    pub fn undo_description(&self) -> Option<&str> {
        self.can_undo().then(|| self.entries[self.index].description.as_str())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.entries.get(self.index + 1).map(|e| e.description.as_str())
    }

    /// Undoable actions, most recent first.
    pub fn undo_history(&self) -> Vec<&str> {
        self.entries
            .iter()
            .take(self.index + 1)
            .skip(1)
            .rev()
            .map(|e| e.description.as_str())
            .collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    /// Drop everything and start over from `initial`.
    pub fn reset(&mut self, initial: S) {
        self.entries.clear();
        self.total_memory = initial.memory_size();
        self.entries.push_back(HistoryEntry { description: "Open".to_string(), state: initial });
        self.index = 0;
    }

    /// Rebuild from persisted entries; `index` is clamped into range.
    pub fn restore_entries(&mut self, entries: Vec<HistoryEntry<S>>, index: usize) {
        if entries.is_empty() {
            return;
        }
        self.total_memory = entries.iter().map(|e| e.state.memory_size()).sum();
        self.index = index.min(entries.len() - 1);
        self.entries = entries.into();
        self.prune();
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry<S>> {
        self.entries.iter()
    }

    fn pop_oldest(&mut self) {
        if let Some(removed) = self.entries.pop_front() {
            self.total_memory = self.total_memory.saturating_sub(removed.state.memory_size());
            self.index = self.index.saturating_sub(1);
        }
    }

    /// Prune old entries to stay within limits.  The current entry is never
    /// dropped.
    fn prune(&mut self) {
        while self.entries.len() > self.max_history_size + 1 && self.index > 0 {
            self.pop_oldest();
        }

        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.index > 0 {
                self.pop_oldest();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl HistoryState for i32 {
        fn memory_size(&self) -> usize {
            4
        }
    }

    #[test]
    fn duplicate_commit_is_ignored() {
        let mut h = HistoryManager::new(0, 10);
        assert!(h.commit("a", 1));
        assert!(!h.commit("again", 1));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn commit_after_undo_drops_redo_branch() {
        let mut h = HistoryManager::new(0, 10);
        h.commit("a", 1);
        h.commit("b", 2);
        assert_eq!(h.undo(), Some(&1));
        h.commit("c", 3);
        assert!(!h.can_redo());
        assert_eq!(h.len(), 3);
        assert_eq!(h.undo(), Some(&1));
    }

    #[test]
    fn boundaries_are_noops() {
        let mut h = HistoryManager::new(0, 10);
        assert_eq!(h.undo(), None);
        assert_eq!(h.index(), 0);
        h.commit("a", 1);
        assert_eq!(h.redo(), None);
        assert_eq!(h.index(), 1);
    }

    #[test]
    fn prune_keeps_index_valid() {
        let mut h = HistoryManager::new(0, 3);
        for i in 1..=10 {
            h.commit("step", i);
        }
        assert_eq!(h.len(), 4);
        assert_eq!(h.current(), &10);
        assert_eq!(h.index(), 3);
        assert_eq!(h.undo_history().len(), 3);
    }

    #[test]
    fn memory_cap_prunes_oldest() {
        let mut h = HistoryManager::new(0, 100);
        h.set_max_memory_bytes(Some(12));
        for i in 1..=5 {
            h.commit("step", i);
        }
        assert!(h.memory_usage() <= 12);
        assert_eq!(h.current(), &5);
    }
}
