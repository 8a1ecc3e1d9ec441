//! Bounded undo/redo log of inverse edit operations.
//!
//! Every successful edit pushes the inverse operation it returned. Undoing
//! applies that inverse, whose own inverse is pushed on the redo stack, and
//! vice versa. Once `depth` entries are stored the oldest is dropped. A fresh
//! edit clears the redo stack.

use super::graph::EditOp;
use std::collections::VecDeque;

/// One reversible step.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Applying this operation reverts the step.
    pub inverse: EditOp,
    pub label: &'static str,
}

#[derive(Debug, Clone)]
pub struct History {
    undo: VecDeque<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    depth: usize,
}

impl History {
    pub fn new(depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Record a fresh edit.
    pub fn record(&mut self, inverse: EditOp, label: &'static str) {
        self.redo.clear();
        self.push_undo(HistoryEntry { inverse, label });
    }

    fn push_undo(&mut self, entry: HistoryEntry) {
        if self.depth == 0 {
            return;
        }
        while self.undo.len() >= self.depth {
            self.undo.pop_front();
        }
        self.undo.push_back(entry);
    }

    /// Take the most recent undo entry.
    pub fn pop_undo(&mut self) -> Option<HistoryEntry> {
        self.undo.pop_back()
    }

    /// Put back an undo entry whose inverse could not be applied.
    pub fn restore_undo(&mut self, entry: HistoryEntry) {
        self.push_undo(entry);
    }

    /// Put back a redo entry whose operation could not be applied.
    pub fn restore_redo(&mut self, entry: HistoryEntry) {
        self.redo.push(entry);
    }

    /// Take the most recent redo entry.
    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop()
    }

    /// After an undo was applied, store the operation that redoes it.
    pub fn push_redo(&mut self, inverse: EditOp, label: &'static str) {
        self.redo.push(HistoryEntry { inverse, label });
    }

    /// After a redo was applied, store the operation that undoes it again
    /// without touching the remaining redo entries.
    pub fn push_undo_after_redo(&mut self, inverse: EditOp, label: &'static str) {
        self.push_undo(HistoryEntry { inverse, label });
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Label of the step `undo` would revert.
    pub fn next_undo_label(&self) -> Option<&'static str> {
        self.undo.back().map(|e| e.label)
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_HISTORY_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::{EdgeId, NodeId};

    fn op(n: u32) -> EditOp {
        EditOp::RemoveNode(NodeId(n))
    }

    #[test]
    fn test_oldest_entries_are_dropped() {
        let mut history = History::new(2);
        history.record(op(1), "add node");
        history.record(op(2), "add node");
        history.record(op(3), "add node");
        assert_eq!(history.undo_len(), 2);
        assert_eq!(history.pop_undo().map(|e| e.inverse), Some(op(3)));
        assert_eq!(history.pop_undo().map(|e| e.inverse), Some(op(2)));
        assert!(history.pop_undo().is_none());
    }

    #[test]
    fn test_new_edit_clears_redo() {
        let mut history = History::new(10);
        history.record(op(1), "add node");
        let entry = history.pop_undo().unwrap();
        history.push_redo(EditOp::Disconnect(EdgeId(0)), entry.label);
        assert!(history.can_redo());

        history.record(op(2), "add node");
        assert!(!history.can_redo());
        assert_eq!(history.next_undo_label(), Some("add node"));
    }

    #[test]
    fn test_redo_keeps_remaining_redo_entries() {
        let mut history = History::new(10);
        history.push_redo(op(1), "connect");
        history.push_redo(op(2), "connect");
        let entry = history.pop_redo().unwrap();
        history.push_undo_after_redo(op(9), entry.label);
        assert_eq!(history.redo_len(), 1);
        assert_eq!(history.undo_len(), 1);
    }

    #[test]
    fn test_zero_depth_disables_undo() {
        let mut history = History::new(0);
        history.record(op(1), "add node");
        assert!(!history.can_undo());
    }
}
