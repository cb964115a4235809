use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type InstrumentId = String;

/// One of the three editable hierarchy levels of a grouping row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupField {
    FirstGroup,
    SecondGroup,
    ThirdGroup,
}

impl GroupField {
    /// All levels, outermost first
    pub const ALL: [GroupField; 3] = [
        GroupField::FirstGroup,
        GroupField::SecondGroup,
        GroupField::ThirdGroup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupField::FirstGroup => "first_group",
            GroupField::SecondGroup => "second_group",
            GroupField::ThirdGroup => "third_group",
        }
    }

    /// Column header used by the tabular model
    pub fn label(&self) -> &'static str {
        match self {
            GroupField::FirstGroup => "First Group",
            GroupField::SecondGroup => "Second Group",
            GroupField::ThirdGroup => "Third Group",
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            GroupField::FirstGroup => 0,
            GroupField::SecondGroup => 1,
            GroupField::ThirdGroup => 2,
        }
    }
}

impl fmt::Display for GroupField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only instrument attributes joined from the live model.
/// Never edited locally and never part of a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maturity: Option<NaiveDate>,
}

impl InstrumentMetadata {
    /// Values exposed to free-text search
    pub fn searchable_values(&self) -> Vec<String> {
        let mut values: Vec<String> = [&self.rating, &self.classification, &self.ticker]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        if let Some(maturity) = self.maturity {
            values.push(maturity.format("%Y-%m-%d").to_string());
        }
        values
    }
}

/// One instrument's assignment to a 3-level hierarchy path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingRecord {
    pub instrument_id: InstrumentId,
    #[serde(default)]
    pub first_group: String,
    #[serde(default)]
    pub second_group: String,
    #[serde(default)]
    pub third_group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<InstrumentMetadata>,
}

impl GroupingRecord {
    pub fn new(
        instrument_id: impl Into<String>,
        first_group: impl Into<String>,
        second_group: impl Into<String>,
        third_group: impl Into<String>,
    ) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            first_group: first_group.into(),
            second_group: second_group.into(),
            third_group: third_group.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: InstrumentMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn group(&self, field: GroupField) -> &str {
        match field {
            GroupField::FirstGroup => &self.first_group,
            GroupField::SecondGroup => &self.second_group,
            GroupField::ThirdGroup => &self.third_group,
        }
    }

    /// Replace one level and return the previous value
    pub(crate) fn set_group(&mut self, field: GroupField, value: String) -> String {
        let slot = match field {
            GroupField::FirstGroup => &mut self.first_group,
            GroupField::SecondGroup => &mut self.second_group,
            GroupField::ThirdGroup => &mut self.third_group,
        };
        std::mem::replace(slot, value)
    }

    pub fn path(&self) -> [&str; 3] {
        [&self.first_group, &self.second_group, &self.third_group]
    }

    /// Human readable path, skipping empty levels
    pub fn path_label(&self) -> String {
        self.path()
            .iter()
            .filter(|level| !level.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" > ")
    }

    /// Levels whose value differs from `other`, outermost first. Metadata is ignored.
    pub fn changed_fields(&self, other: &GroupingRecord) -> Vec<GroupField> {
        GroupField::ALL
            .into_iter()
            .filter(|field| self.group(*field) != other.group(*field))
            .collect()
    }

    /// Returns `(gap, deeper)` when an empty level sits above a non-empty one.
    /// `gap` is the outermost empty level, `deeper` the deepest populated level.
    pub fn hierarchy_gap(&self) -> Option<(GroupField, GroupField)> {
        let deepest = GroupField::ALL
            .into_iter()
            .rev()
            .find(|field| !self.group(*field).is_empty())?;
        GroupField::ALL
            .into_iter()
            .take(deepest.depth())
            .find(|field| self.group(*field).is_empty())
            .map(|gap| (gap, deepest))
    }
}
