use crate::model::{ChangeSet, GroupingRecord, Operation, Snapshot};

/// Compute the change-set that turns `baseline` into `current`.
///
/// Order: additions (current order), removals (baseline order), then
/// field updates (current order, outermost level first).
pub fn compute_diff(current: &Snapshot, baseline: &Snapshot) -> ChangeSet {
    let mut operations = Vec::new();

    // Find added rows
    for record in current.iter() {
        if !baseline.contains(&record.instrument_id) {
            operations.push(Operation::add(record.clone()));
        }
    }

    // Find removed rows
    for record in baseline.iter() {
        if !current.contains(&record.instrument_id) {
            operations.push(Operation::remove(record.clone()));
        }
    }

    // Find modified rows
    for record in current.iter() {
        if let Some(previous) = baseline.get(&record.instrument_id) {
            operations.extend(diff_record(previous, record));
        }
    }

    ChangeSet::new(baseline.fingerprint(), operations)
}

/// One update per differing level. Metadata is never diffed.
pub fn diff_record(from: &GroupingRecord, to: &GroupingRecord) -> Vec<Operation> {
    from.changed_fields(to)
        .into_iter()
        .map(|field| {
            Operation::update(
                to.instrument_id.clone(),
                field,
                from.group(field),
                to.group(field),
            )
        })
        .collect()
}
