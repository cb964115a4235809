use std::collections::VecDeque;

use crate::model::Operation;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// An operation together with the row index it landed at.
/// The index lets an undone removal put the row back where it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Placed {
    pub op: Operation,
    pub slot: Option<usize>,
}

/// One user edit action, possibly touching several fields or rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EditAction {
    pub forward: Vec<Placed>,
    /// Inverses of `forward`, already in reverse order
    pub inverse: Vec<Placed>,
}

impl EditAction {
    pub fn new(forward: Vec<Placed>) -> Self {
        let inverse = forward
            .iter()
            .rev()
            .map(|placed| Placed {
                op: placed.op.inverse(),
                slot: placed.slot,
            })
            .collect();
        Self { forward, inverse }
    }
}

/// Bounded undo stack with a redo stack. Oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct UndoHistory {
    undo: VecDeque<EditAction>,
    redo: Vec<EditAction>,
    limit: usize,
}

impl UndoHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Record a fresh action; any redo branch is dropped
    pub(crate) fn record(&mut self, action: EditAction) {
        self.redo.clear();
        self.push_undo(action);
    }

    pub(crate) fn push_undo(&mut self, action: EditAction) {
        self.undo.push_back(action);
        while self.undo.len() > self.limit {
            self.undo.pop_front();
        }
    }

    pub(crate) fn pop_undo(&mut self) -> Option<EditAction> {
        self.undo.pop_back()
    }

    pub(crate) fn push_redo(&mut self, action: EditAction) {
        self.redo.push(action);
    }

    pub(crate) fn pop_redo(&mut self) -> Option<EditAction> {
        self.redo.pop()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

impl Default for UndoHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
