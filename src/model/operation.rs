use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{GroupField, GroupingRecord, InstrumentId};

/// A single reversible change to the grouping table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op_type", rename_all = "snake_case")]
pub enum Operation {
    Add {
        record: GroupingRecord,
    },
    Update {
        instrument_id: InstrumentId,
        field: GroupField,
        old_value: String,
        new_value: String,
    },
    Remove {
        instrument_id: InstrumentId,
        previous: GroupingRecord,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Add,
    Update,
    Remove,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Add => f.write_str("add"),
            OperationKind::Update => f.write_str("update"),
            OperationKind::Remove => f.write_str("remove"),
        }
    }
}

impl Operation {
    pub fn add(record: GroupingRecord) -> Self {
        Operation::Add { record }
    }

    pub fn update(
        instrument_id: impl Into<String>,
        field: GroupField,
        old_value: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Self {
        Operation::Update {
            instrument_id: instrument_id.into(),
            field,
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }

    pub fn remove(previous: GroupingRecord) -> Self {
        Operation::Remove {
            instrument_id: previous.instrument_id.clone(),
            previous,
        }
    }

    pub fn instrument_id(&self) -> &str {
        match self {
            Operation::Add { record } => &record.instrument_id,
            Operation::Update { instrument_id, .. } => instrument_id,
            Operation::Remove { instrument_id, .. } => instrument_id,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Add { .. } => OperationKind::Add,
            Operation::Update { .. } => OperationKind::Update,
            Operation::Remove { .. } => OperationKind::Remove,
        }
    }

    /// The algebraic inverse: applying `op` then `op.inverse()` restores the prior state
    pub fn inverse(&self) -> Operation {
        match self {
            Operation::Add { record } => Operation::remove(record.clone()),
            Operation::Update {
                instrument_id,
                field,
                old_value,
                new_value,
            } => Operation::Update {
                instrument_id: instrument_id.clone(),
                field: *field,
                old_value: new_value.clone(),
                new_value: old_value.clone(),
            },
            Operation::Remove { previous, .. } => Operation::add(previous.clone()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Add { record } => {
                write!(f, "add '{}' [{}]", record.instrument_id, record.path_label())
            }
            Operation::Update {
                instrument_id,
                field,
                old_value,
                new_value,
            } => write!(
                f,
                "update '{}'.{}: '{}' -> '{}'",
                instrument_id, field, old_value, new_value
            ),
            Operation::Remove { instrument_id, .. } => write!(f, "remove '{}'", instrument_id),
        }
    }
}
