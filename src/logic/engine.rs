use serde::Serialize;

use crate::error::StoreError;
use crate::logic::diff::compute_diff;
use crate::logic::grouping_store::GroupingStore;
use crate::logic::history::{EditAction, Placed, UndoHistory};
use crate::logic::validate::Validator;
use crate::model::{
    ChangeSet, GroupField, GroupingRecord, InstrumentId, Operation, ReferenceContext, Snapshot,
    ValidationReport,
};

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Added,
    Updated(usize),
    Unchanged,
}

/// Owns the grouping store and is the only path through which it mutates.
///
/// Every mutation is an [`Operation`] recorded in the operation log and the
/// undo history. The change-set is never tracked incrementally: it is always
/// recomputed as `diff(current, baseline)`.
#[derive(Debug, Clone, Default)]
pub struct ChangeSetEngine {
    store: GroupingStore,
    history: UndoHistory,
    journal: Vec<Operation>,
}

impl ChangeSetEngine {
    pub fn new(history_limit: usize) -> Self {
        Self {
            store: GroupingStore::new(),
            history: UndoHistory::new(history_limit),
            journal: Vec::new(),
        }
    }

    /// Replace current state and baseline wholesale, e.g. after a re-import
    pub fn load(&mut self, records: Vec<GroupingRecord>) -> Result<(), StoreError> {
        self.store.load(records)?;
        self.history.clear();
        self.journal.clear();
        Ok(())
    }

    pub fn store(&self) -> &GroupingStore {
        &self.store
    }

    pub fn records(&self) -> &Snapshot {
        self.store.get_all()
    }

    pub fn baseline(&self) -> &Snapshot {
        self.store.baseline()
    }

    pub fn history(&self) -> &UndoHistory {
        &self.history
    }

    /// Every operation applied to the current state since the last load, sync or discard
    pub fn operation_log(&self) -> &[Operation] {
        &self.journal
    }

    /// Record a single operation as one undoable action
    pub fn record_operation(&mut self, op: Operation) -> Result<(), StoreError> {
        self.record_action(vec![op])
    }

    /// Record several operations as ONE undoable action.
    /// On failure the part already applied is reverted and nothing is recorded.
    pub fn record_action(&mut self, ops: Vec<Operation>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut forward = Vec::with_capacity(ops.len());
        for op in &ops {
            match self.store.apply(op, None) {
                Ok((applied, index)) => forward.push(Placed {
                    op: applied,
                    slot: Some(index),
                }),
                Err(e) => {
                    // Nothing of the partial action was journaled, so revert the store only
                    for step in EditAction::new(forward).inverse {
                        if let Err(revert_err) = self.store.apply(&step.op, step.slot) {
                            log::error!("Failed to revert partial action: {}", revert_err);
                        }
                    }
                    return Err(e);
                }
            }
        }

        self.journal
            .extend(forward.iter().map(|placed| placed.op.clone()));
        self.history.record(EditAction::new(forward));
        Ok(())
    }

    pub fn add(&mut self, record: GroupingRecord) -> Result<(), StoreError> {
        self.record_operation(Operation::add(record))
    }

    /// Remove a row, returning it
    pub fn remove(&mut self, instrument_id: &str) -> Result<GroupingRecord, StoreError> {
        let previous = self
            .store
            .get(instrument_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(instrument_id.to_string()))?;
        self.record_operation(Operation::remove(previous.clone()))?;
        Ok(previous)
    }

    /// Set one level. Returns `false` without recording anything if the value is unchanged.
    pub fn set_field(
        &mut self,
        instrument_id: &str,
        field: GroupField,
        value: impl Into<String>,
    ) -> Result<bool, StoreError> {
        let value = value.into();
        let current = self
            .store
            .get(instrument_id)
            .ok_or_else(|| StoreError::NotFound(instrument_id.to_string()))?;
        if current.group(field) == value {
            return Ok(false);
        }
        let old_value = current.group(field).to_string();
        self.record_operation(Operation::update(instrument_id, field, old_value, value))?;
        Ok(true)
    }

    /// Add the record, or update every level that differs as a single action
    pub fn upsert(&mut self, record: GroupingRecord) -> Result<UpsertOutcome, StoreError> {
        let Some(current) = self.store.get(&record.instrument_id) else {
            self.add(record)?;
            return Ok(UpsertOutcome::Added);
        };

        let updates = crate::logic::diff::diff_record(current, &record);
        if updates.is_empty() {
            return Ok(UpsertOutcome::Unchanged);
        }
        let count = updates.len();
        self.record_action(updates)?;
        Ok(UpsertOutcome::Updated(count))
    }

    /// Assign the same hierarchy path to many instruments in one action.
    /// Returns the number of field updates recorded.
    pub fn assign_path(
        &mut self,
        instrument_ids: &[InstrumentId],
        path: [&str; 3],
    ) -> Result<usize, StoreError> {
        let mut updates = Vec::new();
        for instrument_id in instrument_ids {
            let current = self
                .store
                .get(instrument_id)
                .ok_or_else(|| StoreError::NotFound(instrument_id.clone()))?;
            for (field, value) in GroupField::ALL.into_iter().zip(path) {
                if current.group(field) != value {
                    updates.push(Operation::update(
                        instrument_id.clone(),
                        field,
                        current.group(field),
                        value,
                    ));
                }
            }
        }
        let count = updates.len();
        self.record_action(updates)?;
        Ok(count)
    }

    /// What would be sent to the model if applied now
    pub fn current_change_set(&self) -> ChangeSet {
        compute_diff(self.store.get_all(), self.store.baseline())
    }

    pub fn validate(&self, context: &ReferenceContext) -> ValidationReport {
        Validator::validate(&self.current_change_set(), self.store.baseline(), context)
    }

    pub fn is_dirty(&self) -> bool {
        self.store.get_all() != self.store.baseline()
    }

    /// Revert the most recent action. No-op (returns `false`) on an empty stack.
    pub fn undo(&mut self) -> bool {
        let Some(action) = self.history.pop_undo() else {
            return false;
        };
        match self.replay(&action.inverse) {
            Ok(()) => {
                self.history.push_redo(action);
                true
            }
            Err(e) => {
                log::error!("Undo could not be applied, clearing history: {}", e);
                self.history.clear();
                false
            }
        }
    }

    /// Re-apply the most recently undone action. No-op (returns `false`) on an empty stack.
    pub fn redo(&mut self) -> bool {
        let Some(action) = self.history.pop_redo() else {
            return false;
        };
        match self.replay(&action.forward) {
            Ok(()) => {
                self.history.push_undo(action);
                true
            }
            Err(e) => {
                log::error!("Redo could not be applied, clearing history: {}", e);
                self.history.clear();
                false
            }
        }
    }

    /// Throw away every local edit
    pub fn discard(&mut self) {
        self.store.reset_to_baseline();
        self.history.clear();
        self.journal.clear();
    }

    /// The live model now matches current state: advance the baseline
    pub(crate) fn mark_synced(&mut self) {
        self.store.advance_baseline();
        self.history.clear();
        self.journal.clear();
    }

    fn replay(&mut self, steps: &[Placed]) -> Result<(), StoreError> {
        for step in steps {
            let (applied, _) = self.store.apply(&step.op, step.slot)?;
            self.journal.push(applied);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::history::DEFAULT_HISTORY_LIMIT;

    fn engine() -> ChangeSetEngine {
        let mut engine = ChangeSetEngine::new(DEFAULT_HISTORY_LIMIT);
        engine
            .load(vec![
                GroupingRecord::new("A001", "G1", "", ""),
                GroupingRecord::new("A002", "G1", "G1b", ""),
                GroupingRecord::new("A003", "G2", "", ""),
            ])
            .unwrap();
        engine
    }

    fn assert_diff_invariant(engine: &ChangeSetEngine) {
        assert_eq!(
            engine.current_change_set(),
            compute_diff(engine.records(), engine.baseline())
        );
        // Replaying the change-set over the baseline reproduces the current rows
        let mut replayed = GroupingStore::new();
        replayed.load(engine.baseline().records()).unwrap();
        for op in engine.current_change_set().operations {
            replayed.apply(&op, None).unwrap();
        }
        let mut expected: Vec<_> = engine.records().records();
        let mut actual: Vec<_> = replayed.get_all().records();
        expected.sort_by(|a, b| a.instrument_id.cmp(&b.instrument_id));
        actual.sort_by(|a, b| a.instrument_id.cmp(&b.instrument_id));
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_change_set_tracks_every_operation() {
        let mut engine = engine();
        let ops = vec![
            Operation::update("A001", GroupField::SecondGroup, "", "G1a"),
            Operation::add(GroupingRecord::new("B002", "G3", "", "")),
            Operation::remove(GroupingRecord::new("A003", "G2", "", "")),
            Operation::update("A001", GroupField::SecondGroup, "G1a", "G1c"),
            Operation::update("B002", GroupField::FirstGroup, "G3", "G4"),
            Operation::update("A002", GroupField::SecondGroup, "G1b", "X"),
            Operation::update("A002", GroupField::SecondGroup, "X", "G1b"),
        ];
        for op in ops {
            engine.record_operation(op).unwrap();
            assert_diff_invariant(&engine);
        }

        // Last write per field wins, reverted edits vanish
        let change_set = engine.current_change_set();
        assert_eq!(
            change_set.operations,
            vec![
                Operation::add(GroupingRecord::new("B002", "G4", "", "")),
                Operation::remove(GroupingRecord::new("A003", "G2", "", "")),
                Operation::update("A001", GroupField::SecondGroup, "", "G1c"),
            ]
        );
        assert_eq!(engine.operation_log().len(), 7);
    }

    #[test]
    fn test_scenario_single_level_edit() {
        let mut engine = ChangeSetEngine::default();
        engine
            .load(vec![GroupingRecord::new("A001", "G1", "", "")])
            .unwrap();
        assert!(engine
            .set_field("A001", GroupField::SecondGroup, "G1a")
            .unwrap());
        assert_eq!(
            engine.current_change_set().operations,
            vec![Operation::update("A001", GroupField::SecondGroup, "", "G1a")]
        );
    }

    #[test]
    fn test_undo_redo_restores_exact_state() {
        let ops = vec![
            Operation::update("A002", GroupField::ThirdGroup, "", "Z"),
            Operation::add(GroupingRecord::new("B002", "G3", "", "")),
            Operation::remove(GroupingRecord::new("A002", "G1", "G1b", "")),
        ];
        for op in ops {
            let mut engine = engine();
            engine.record_operation(op).unwrap();
            let after = engine.records().clone();
            let fingerprint = after.fingerprint();

            assert!(engine.undo());
            assert_eq!(engine.records(), engine.baseline());
            assert!(engine.redo());
            assert_eq!(engine.records(), &after);
            assert_eq!(engine.records().fingerprint(), fingerprint);

            assert!(engine.undo());
            assert!(engine.redo());
            assert!(engine.undo());
            assert_eq!(engine.records(), engine.baseline());
            assert_diff_invariant(&engine);
        }
    }

    #[test]
    fn test_undo_redo_are_noops_at_boundaries() {
        let mut engine = engine();
        assert!(!engine.undo());
        assert!(!engine.undo());
        assert!(!engine.redo());
        assert_eq!(engine.records(), engine.baseline());

        engine
            .set_field("A001", GroupField::FirstGroup, "G9")
            .unwrap();
        assert!(engine.undo());
        assert!(!engine.undo());
        assert!(!engine.undo());
        assert_eq!(engine.records(), engine.baseline());

        assert!(engine.redo());
        assert!(!engine.redo());
        assert!(!engine.redo());
        assert_eq!(engine.records().get("A001").unwrap().first_group, "G9");
    }

    #[test]
    fn test_multi_field_action_is_one_undo_entry() {
        let mut engine = engine();
        let outcome = engine
            .upsert(GroupingRecord::new("A001", "G5", "G5a", "G5b"))
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated(3));
        assert_eq!(engine.history().undo_depth(), 1);
        assert_eq!(engine.current_change_set().len(), 3);

        assert!(engine.undo());
        assert!(engine.current_change_set().is_empty());
    }

    #[test]
    fn test_assign_path_bulk_action() {
        let mut engine = engine();
        let ids = vec!["A001".to_string(), "A003".to_string()];
        let count = engine.assign_path(&ids, ["Corp", "Fin", ""]).unwrap();
        assert_eq!(count, 4);
        assert_eq!(engine.history().undo_depth(), 1);
        assert_eq!(engine.records().get("A003").unwrap().path(), ["Corp", "Fin", ""]);

        let missing = vec!["A001".to_string(), "NOPE".to_string()];
        assert_eq!(
            engine.assign_path(&missing, ["X", "", ""]),
            Err(StoreError::NotFound("NOPE".to_string()))
        );
        assert_eq!(engine.history().undo_depth(), 1);
    }

    #[test]
    fn test_failed_action_reverts_partial_application() {
        let mut engine = engine();
        let before = engine.records().clone();
        let result = engine.record_action(vec![
            Operation::remove(GroupingRecord::new("A001", "G1", "", "")),
            Operation::add(GroupingRecord::new("A002", "dup", "", "")),
        ]);
        assert_eq!(result, Err(StoreError::DuplicateKey("A002".to_string())));
        assert_eq!(engine.records(), &before);
        assert!(!engine.history().can_undo());
    }

    #[test]
    fn test_store_contract_errors() {
        let mut engine = engine();
        assert_eq!(
            engine.remove("Z999"),
            Err(StoreError::NotFound("Z999".to_string()))
        );
        assert_eq!(
            engine.set_field("Z999", GroupField::FirstGroup, "X"),
            Err(StoreError::NotFound("Z999".to_string()))
        );
        assert_eq!(
            engine.add(GroupingRecord::new("A001", "", "", "")),
            Err(StoreError::DuplicateKey("A001".to_string()))
        );
        assert_eq!(
            engine.upsert(GroupingRecord::new("A001", "G1", "", "")),
            Ok(UpsertOutcome::Unchanged)
        );
        assert!(!engine.set_field("A001", GroupField::FirstGroup, "G1").unwrap());
        assert!(!engine.history().can_undo());
    }

    #[test]
    fn test_discard_empties_change_set() {
        let mut engine = engine();
        engine.remove("A001").unwrap();
        engine
            .add(GroupingRecord::new("B002", "G1", "", ""))
            .unwrap();
        assert!(engine.is_dirty());

        engine.discard();
        assert!(engine.current_change_set().is_empty());
        assert!(!engine.history().can_undo());
        assert!(!engine.history().can_redo());
        assert!(engine.operation_log().is_empty());
    }

    #[test]
    fn test_mark_synced_advances_baseline() {
        let mut engine = engine();
        engine
            .set_field("A001", GroupField::SecondGroup, "G1a")
            .unwrap();
        engine.mark_synced();
        assert!(engine.current_change_set().is_empty());
        assert_eq!(engine.baseline().get("A001").unwrap().second_group, "G1a");
        assert!(!engine.undo());
    }

    #[test]
    fn test_failed_action_leaves_no_trace() {
        let mut engine = engine();
        let before = engine.records().clone();

        let err = engine
            .record_action(vec![
                Operation::remove(GroupingRecord::new("A001", "G1", "", "")),
                Operation::add(GroupingRecord::new("A002", "G9", "", "")),
            ])
            .unwrap_err();

        assert_eq!(err, StoreError::DuplicateKey("A002".to_string()));
        assert_eq!(engine.records(), &before);
        assert_eq!(engine.records().position("A001"), Some(0));
        assert!(engine.operation_log().is_empty());
        assert!(!engine.history().can_undo());
        assert!(engine.current_change_set().is_empty());
    }
}
