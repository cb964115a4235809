use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::model::{ChangeSet, GroupField, InstrumentId, Operation, OperationKind};

const HEADERS: [&str; 5] = [
    "Instrument ID",
    "Change",
    "Group Level",
    "Original Value",
    "New Value",
];

/// One display row of a change-set preview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRow {
    pub instrument_id: InstrumentId,
    pub kind: OperationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<GroupField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<String>,
}

impl PreviewRow {
    fn from_operation(op: &Operation) -> Self {
        match op {
            Operation::Add { record } => PreviewRow {
                instrument_id: record.instrument_id.clone(),
                kind: OperationKind::Add,
                field: None,
                old: None,
                new: Some(record.path_label()),
            },
            Operation::Update {
                instrument_id,
                field,
                old_value,
                new_value,
            } => PreviewRow {
                instrument_id: instrument_id.clone(),
                kind: OperationKind::Update,
                field: Some(*field),
                old: Some(old_value.clone()),
                new: Some(new_value.clone()),
            },
            Operation::Remove {
                instrument_id,
                previous,
            } => PreviewRow {
                instrument_id: instrument_id.clone(),
                kind: OperationKind::Remove,
                field: None,
                old: Some(previous.path_label()),
                new: None,
            },
        }
    }

    fn cells(&self) -> [String; 5] {
        [
            self.instrument_id.clone(),
            self.kind.to_string(),
            self.field.map(|f| f.label().to_string()).unwrap_or_default(),
            self.old.clone().unwrap_or_default(),
            self.new.clone().unwrap_or_default(),
        ]
    }
}

/// Row counts for a change-set header line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewSummary {
    pub added: usize,
    /// Distinct instruments with at least one updated level
    pub changed: usize,
    pub removed: usize,
}

impl PreviewSummary {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.changed == 0 && self.removed == 0
    }
}

/// Display rows in change-set order
pub fn format(change_set: &ChangeSet) -> Vec<PreviewRow> {
    change_set.iter().map(PreviewRow::from_operation).collect()
}

pub fn summarize(change_set: &ChangeSet) -> PreviewSummary {
    PreviewSummary {
        added: change_set.count(OperationKind::Add),
        changed: change_set
            .iter()
            .filter(|op| op.kind() == OperationKind::Update)
            .map(Operation::instrument_id)
            .unique()
            .count(),
        removed: change_set.count(OperationKind::Remove),
    }
}

/// Fixed-width text table, one line per row
pub fn render_text(rows: &[PreviewRow]) -> String {
    if rows.is_empty() {
        return "No changes detected.".to_string();
    }

    let cells: Vec<[String; 5]> = rows.iter().map(PreviewRow::cells).collect();
    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |values: &[&str]| {
        values
            .iter()
            .zip(widths.iter())
            .map(|(value, width)| format!("{:<width$}", value, width = *width))
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = Vec::with_capacity(cells.len() + 2);
    out.push(line(&HEADERS[..]));
    out.push(widths.iter().map(|w| "-".repeat(*w)).join("-+-"));
    for row in &cells {
        let values: Vec<&str> = row.iter().map(String::as_str).collect();
        out.push(line(&values));
    }
    out.join("\n")
}
