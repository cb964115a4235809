use serde::Serialize;
use thiserror::Error;

use crate::logic::apply::ApplyState;
use crate::model::{InstrumentId, Operation, ValidationReport};

/// Local contract violations against the grouping table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("instrument '{0}' not found")]
    NotFound(InstrumentId),
    #[error("instrument '{0}' already exists; update it instead")]
    DuplicateKey(InstrumentId),
}

/// A single remote write that the live model refused or could not take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum WriteError {
    #[error("rejected by model: {0}")]
    Rejected(String),
    #[error("model unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to read from model: {0}")]
pub struct ReadError(pub String);

/// Which operation failed, against which instrument, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{operation} failed for instrument '{instrument_id}': {source}")]
pub struct OperationFailure {
    pub operation: Operation,
    pub instrument_id: InstrumentId,
    pub source: WriteError,
}

impl OperationFailure {
    pub fn new(operation: &Operation, source: WriteError) -> Self {
        Self {
            instrument_id: operation.instrument_id().to_string(),
            operation: operation.clone(),
            source,
        }
    }
}

/// Rollback stopped partway. The live model matches neither the old nor the intended state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error(
    "rollback failed ({rollback_failure}); {} operation(s) remain applied on the live model",
    .still_applied.len()
)]
pub struct InconsistencyError {
    /// The forward failure that triggered rollback, `None` if it was a cancellation
    pub failure: Option<OperationFailure>,
    /// The inverse write that could not be executed
    pub rollback_failure: OperationFailure,
    /// Forward operations whose effect is still present remotely, in application order
    pub still_applied: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApplyError {
    #[error("change-set is not apply-eligible: {} blocking validation error(s)", .0.error_count())]
    Validation(ValidationReport),
    #[error("change-set no longer matches the editable state; recompute it")]
    StaleChangeSet,
    #[error("coordinator is {0} and cannot start an apply")]
    Blocked(ApplyState),
    #[error("apply failed and was rolled back ({reverted} operation(s) reverted): {failure}")]
    RolledBack {
        failure: OperationFailure,
        reverted: usize,
    },
    #[error("apply cancelled and rolled back ({reverted} operation(s) reverted)")]
    Cancelled { reverted: usize },
    #[error("fatal inconsistency: {0}")]
    Inconsistent(#[from] InconsistencyError),
}

impl ApplyError {
    /// Only an inconsistency leaves the live model in an unknown shape
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApplyError::Inconsistent(_))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
}
