use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::model::{Operation, OperationKind};

/// The ordered diff between editable state and the baseline it was derived from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Fingerprint of the baseline snapshot this diff was computed against
    pub base_fingerprint: String,
    pub operations: Vec<Operation>,
}

impl ChangeSet {
    pub fn new(base_fingerprint: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self {
            base_fingerprint: base_fingerprint.into(),
            operations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }

    /// Instruments touched by any operation, in first-seen order
    pub fn touched_ids(&self) -> Vec<&str> {
        self.operations
            .iter()
            .map(Operation::instrument_id)
            .unique()
            .collect()
    }

    pub fn touched_set(&self) -> HashSet<&str> {
        self.operations.iter().map(Operation::instrument_id).collect()
    }

    pub fn count(&self, kind: OperationKind) -> usize {
        self.operations.iter().filter(|op| op.kind() == kind).count()
    }
}
