use indexmap::IndexMap;
use std::collections::HashSet;

use crate::model::{
    ChangeSet, GroupField, GroupingRecord, Operation, ReferenceContext, Severity, Snapshot,
    ValidationCode, ValidationReport,
};

/// Checks a change-set against structural constraints before it may be applied.
/// Pure: the same inputs always produce the same report.
pub struct Validator;

impl Validator {
    /// Run every check, in order, without short-circuiting
    pub fn validate(
        change_set: &ChangeSet,
        baseline: &Snapshot,
        context: &ReferenceContext,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();

        let resulting = Self::check_keys(change_set, baseline, &mut report);
        Self::check_hierarchy(&resulting, &mut report);
        Self::check_references(change_set, context, &mut report);
        Self::check_values(change_set, &mut report);

        report
    }

    /// Key integrity. Folds the change-set over the baseline and returns the
    /// resulting record of every touched key (`None` when removed), in first-touch order.
    fn check_keys(
        change_set: &ChangeSet,
        baseline: &Snapshot,
        report: &mut ValidationReport,
    ) -> IndexMap<String, Option<GroupingRecord>> {
        let mut overlay: IndexMap<String, Option<GroupingRecord>> = IndexMap::new();
        let mut added: HashSet<&str> = HashSet::new();
        let mut duplicates_reported: HashSet<&str> = HashSet::new();

        for op in change_set.iter() {
            let instrument_id = op.instrument_id();
            if instrument_id.trim().is_empty() && !matches!(op, Operation::Remove { .. }) {
                report.push(
                    Severity::Error,
                    ValidationCode::EmptyKey,
                    None,
                    None,
                    format!("{} has an empty instrument id", op.kind()),
                );
                continue;
            }

            let existing = match overlay.get(instrument_id) {
                Some(state) => state.clone(),
                None => baseline.get(instrument_id).cloned(),
            };

            match op {
                Operation::Add { record } => {
                    if !added.insert(instrument_id) {
                        if duplicates_reported.insert(instrument_id) {
                            report.push(
                                Severity::Error,
                                ValidationCode::DuplicateAdd,
                                Some(instrument_id),
                                None,
                                format!(
                                    "Instrument '{}' is added more than once in this change-set",
                                    instrument_id
                                ),
                            );
                        }
                    } else if existing.is_some() {
                        report.push(
                            Severity::Error,
                            ValidationCode::KeyExists,
                            Some(instrument_id),
                            None,
                            format!(
                                "Instrument '{}' already exists; it must be updated, not added",
                                instrument_id
                            ),
                        );
                    }
                    overlay.insert(instrument_id.to_string(), Some(record.clone()));
                }
                Operation::Update {
                    field, new_value, ..
                } => match existing {
                    Some(mut record) => {
                        record.set_group(*field, new_value.clone());
                        overlay.insert(instrument_id.to_string(), Some(record));
                    }
                    None => report.push(
                        Severity::Error,
                        ValidationCode::UnknownKey,
                        Some(instrument_id),
                        Some(*field),
                        format!(
                            "Cannot update {} of unknown instrument '{}'",
                            field, instrument_id
                        ),
                    ),
                },
                Operation::Remove { .. } => {
                    if existing.is_none() {
                        report.push(
                            Severity::Error,
                            ValidationCode::UnknownKey,
                            Some(instrument_id),
                            None,
                            format!("Cannot remove unknown instrument '{}'", instrument_id),
                        );
                    }
                    overlay.insert(instrument_id.to_string(), None);
                }
            }
        }

        overlay
    }

    /// Level ordering: no empty level above a populated one
    fn check_hierarchy(
        resulting: &IndexMap<String, Option<GroupingRecord>>,
        report: &mut ValidationReport,
    ) {
        for (instrument_id, record) in resulting {
            let Some(record) = record else { continue };
            if let Some((gap, deeper)) = record.hierarchy_gap() {
                report.push(
                    Severity::Error,
                    ValidationCode::HierarchyGap,
                    Some(instrument_id.as_str()),
                    Some(gap),
                    format!(
                        "{} is set to '{}' but {} is empty",
                        deeper.label(),
                        record.group(deeper),
                        gap.label()
                    ),
                );
            }
        }
    }

    /// New instruments the model does not recognize are allowed but flagged
    fn check_references(
        change_set: &ChangeSet,
        context: &ReferenceContext,
        report: &mut ValidationReport,
    ) {
        for op in change_set.iter() {
            let Operation::Add { record } = op else { continue };
            if record.instrument_id.trim().is_empty() {
                continue;
            }
            if context.recognizes(&record.instrument_id) == Some(false) {
                report.push(
                    Severity::Warning,
                    ValidationCode::UnknownInstrument,
                    Some(record.instrument_id.as_str()),
                    None,
                    format!(
                        "Instrument '{}' is not yet recognized by the model",
                        record.instrument_id
                    ),
                );
            }
        }
    }

    /// Intentional clears and stray whitespace are surfaced, never blocking
    fn check_values(change_set: &ChangeSet, report: &mut ValidationReport) {
        for op in change_set.iter() {
            match op {
                Operation::Update {
                    instrument_id,
                    field,
                    old_value,
                    new_value,
                } => {
                    if new_value.is_empty() && !old_value.is_empty() {
                        report.push(
                            Severity::Warning,
                            ValidationCode::ClearedLevel,
                            Some(instrument_id.as_str()),
                            Some(*field),
                            format!(
                                "{} of '{}' is cleared (was '{}')",
                                field.label(),
                                instrument_id,
                                old_value
                            ),
                        );
                    }
                    Self::check_untrimmed(instrument_id, *field, new_value, report);
                }
                Operation::Add { record } => {
                    for field in GroupField::ALL {
                        Self::check_untrimmed(
                            &record.instrument_id,
                            field,
                            record.group(field),
                            report,
                        );
                    }
                }
                Operation::Remove { .. } => {}
            }
        }
    }

    fn check_untrimmed(
        instrument_id: &str,
        field: GroupField,
        value: &str,
        report: &mut ValidationReport,
    ) {
        if value.trim() != value {
            report.push(
                Severity::Warning,
                ValidationCode::UntrimmedValue,
                Some(instrument_id),
                Some(field),
                format!(
                    "{} of '{}' has leading or trailing whitespace",
                    field.label(),
                    instrument_id
                ),
            );
        }
    }
}
