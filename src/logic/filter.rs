use serde::Deserialize;
use std::collections::HashSet;

use crate::model::{ChangeSet, GroupField, GroupingRecord, Snapshot};

/// Row filter for the editable table. Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RecordFilter {
    /// Substring searched in the id, every group level and the metadata
    #[serde(rename = "q")]
    pub text: Option<String>,
    pub ignore_case: bool,
    #[serde(rename = "first")]
    pub first_group: Option<String>,
    #[serde(rename = "second")]
    pub second_group: Option<String>,
    #[serde(rename = "third")]
    pub third_group: Option<String>,
    /// Only instruments touched by the pending change-set
    #[serde(rename = "changed")]
    pub only_changed: bool,
}

impl RecordFilter {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    fn level(&self, field: GroupField) -> Option<&str> {
        match field {
            GroupField::FirstGroup => self.first_group.as_deref(),
            GroupField::SecondGroup => self.second_group.as_deref(),
            GroupField::ThirdGroup => self.third_group.as_deref(),
        }
    }

    fn matches_text(&self, record: &GroupingRecord) -> bool {
        let Some(needle) = self.text.as_deref().filter(|t| !t.is_empty()) else {
            return true;
        };

        let mut haystack: Vec<String> = vec![
            record.instrument_id.clone(),
            record.first_group.clone(),
            record.second_group.clone(),
            record.third_group.clone(),
        ];
        if let Some(metadata) = &record.metadata {
            haystack.extend(metadata.searchable_values());
        }

        if self.ignore_case {
            let needle = needle.to_lowercase();
            haystack
                .iter()
                .any(|value| value.to_lowercase().contains(&needle))
        } else {
            haystack.iter().any(|value| value.contains(needle))
        }
    }

    /// Whether `record` passes every criterion except `only_changed`
    pub fn matches(&self, record: &GroupingRecord) -> bool {
        let levels_match = GroupField::ALL.iter().all(|field| match self.level(*field) {
            Some(expected) => record.group(*field) == expected,
            None => true,
        });
        levels_match && self.matches_text(record)
    }
}

/// Matching rows in store order
pub fn filter_records<'a>(
    records: &'a Snapshot,
    filter: &RecordFilter,
    change_set: &ChangeSet,
) -> Vec<&'a GroupingRecord> {
    let touched: Option<HashSet<&str>> = filter.only_changed.then(|| change_set.touched_set());
    records
        .iter()
        .filter(|record| {
            touched
                .as_ref()
                .map_or(true, |ids| ids.contains(record.instrument_id.as_str()))
        })
        .filter(|record| filter.matches(record))
        .collect()
}
