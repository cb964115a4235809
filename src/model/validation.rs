use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::model::{GroupField, InstrumentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Shown to the user, never blocks apply
    Warning,
    /// Blocks apply
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    EmptyKey,
    DuplicateAdd,
    KeyExists,
    UnknownKey,
    HierarchyGap,
    UnknownInstrument,
    ClearedLevel,
    UntrimmedValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationEntry {
    pub severity: Severity,
    pub code: ValidationCode,
    pub instrument_id: Option<InstrumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<GroupField>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub entries: Vec<ValidationEntry>,
}

impl ValidationReport {
    pub(crate) fn push(
        &mut self,
        severity: Severity,
        code: ValidationCode,
        instrument_id: Option<&str>,
        field: Option<GroupField>,
        message: impl Into<String>,
    ) {
        self.entries.push(ValidationEntry {
            severity,
            code,
            instrument_id: instrument_id.map(str::to_string),
            field,
            message: message.into(),
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.severity == Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// True when no blocking entry exists
    pub fn is_apply_eligible(&self) -> bool {
        self.error_count() == 0
    }

    pub fn has_code(&self, code: ValidationCode) -> bool {
        self.entries.iter().any(|entry| entry.code == code)
    }
}

/// What the live model is known to contain, used for referential checks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceContext {
    /// `None` disables the referential plausibility check
    pub known_instruments: Option<HashSet<InstrumentId>>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl ReferenceContext {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn with_instruments(known: HashSet<InstrumentId>) -> Self {
        Self {
            known_instruments: Some(known),
            fetched_at: Some(Utc::now()),
        }
    }

    /// `None` when no reference set is available
    pub fn recognizes(&self, instrument_id: &str) -> Option<bool> {
        self.known_instruments
            .as_ref()
            .map(|known| known.contains(instrument_id))
    }
}
