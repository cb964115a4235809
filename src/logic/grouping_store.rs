use std::sync::Arc;

use crate::error::StoreError;
use crate::model::{GroupingRecord, Operation, Snapshot};

/// Authoritative in-memory grouping table plus the last-synced baseline.
///
/// Callers only get read access. Mutation goes through the change-set engine,
/// which is the sole owner of a store and records every operation it applies.
#[derive(Debug, Clone, Default)]
pub struct GroupingStore {
    current: Snapshot,
    baseline: Arc<Snapshot>,
}

impl GroupingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both current state and baseline. Leaves the store untouched on error.
    pub fn load(&mut self, records: Vec<GroupingRecord>) -> Result<(), StoreError> {
        let snapshot = Snapshot::from_records(records)?;
        self.baseline = Arc::new(snapshot.clone());
        self.current = snapshot;
        Ok(())
    }

    /// Current editable rows, in insertion order
    pub fn get_all(&self) -> &Snapshot {
        &self.current
    }

    pub fn get(&self, instrument_id: &str) -> Option<&GroupingRecord> {
        self.current.get(instrument_id)
    }

    pub fn baseline(&self) -> &Snapshot {
        &self.baseline
    }

    /// Promote current state to baseline after a confirmed sync
    pub(crate) fn advance_baseline(&mut self) {
        self.baseline = Arc::new(self.current.clone());
    }

    pub(crate) fn reset_to_baseline(&mut self) {
        self.current = (*self.baseline).clone();
    }

    /// Apply `op` to the current state.
    ///
    /// Returns the operation as it actually took effect: `old_value` and
    /// `previous` are read from the current row, so its inverse is exact.
    /// The index is where the row now sits (or sat, for a removal).
    pub(crate) fn apply(
        &mut self,
        op: &Operation,
        slot: Option<usize>,
    ) -> Result<(Operation, usize), StoreError> {
        match op {
            Operation::Add { record } => {
                let index = self.current.insert_at(record.clone(), slot)?;
                Ok((op.clone(), index))
            }
            Operation::Update {
                instrument_id,
                field,
                new_value,
                ..
            } => {
                let (index, old_value) =
                    self.current
                        .set_group(instrument_id, *field, new_value.clone())?;
                Ok((
                    Operation::Update {
                        instrument_id: instrument_id.clone(),
                        field: *field,
                        old_value,
                        new_value: new_value.clone(),
                    },
                    index,
                ))
            }
            Operation::Remove { instrument_id, .. } => {
                let (index, previous) = self.current.remove(instrument_id)?;
                Ok((Operation::remove(previous), index))
            }
        }
    }
}
