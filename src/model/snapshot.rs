use indexmap::IndexMap;

use crate::error::StoreError;
use crate::model::{GroupField, GroupingRecord, InstrumentId};

/// Ordered grouping table keyed by instrument id.
/// Iteration follows insertion order, lookup by key is O(1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    rows: IndexMap<InstrumentId, GroupingRecord>,
}

impl Snapshot {
    /// Build a snapshot, rejecting duplicate instrument ids
    pub fn from_records(records: Vec<GroupingRecord>) -> Result<Self, StoreError> {
        let mut rows = IndexMap::with_capacity(records.len());
        for record in records {
            if rows.contains_key(&record.instrument_id) {
                return Err(StoreError::DuplicateKey(record.instrument_id));
            }
            rows.insert(record.instrument_id.clone(), record);
        }
        Ok(Self { rows })
    }

    pub fn get(&self, instrument_id: &str) -> Option<&GroupingRecord> {
        self.rows.get(instrument_id)
    }

    pub fn contains(&self, instrument_id: &str) -> bool {
        self.rows.contains_key(instrument_id)
    }

    pub fn position(&self, instrument_id: &str) -> Option<usize> {
        self.rows.get_index_of(instrument_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupingRecord> {
        self.rows.values()
    }

    pub fn records(&self) -> Vec<GroupingRecord> {
        self.rows.values().cloned().collect()
    }

    /// SHA-256 over the ordered grouping rows. Metadata does not contribute.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(format!("rows:{}\n", self.rows.len()));
        for record in self.rows.values() {
            // Length prefixes keep field boundaries unambiguous
            for value in [
                record.instrument_id.as_str(),
                record.first_group.as_str(),
                record.second_group.as_str(),
                record.third_group.as_str(),
            ] {
                hasher.update(format!("{}:{}|", value.len(), value));
            }
            hasher.update("\n");
        }

        hex::encode(hasher.finalize())
    }

    /// Insert a new row at `slot` (clamped), or at the end. Returns the final index.
    pub(crate) fn insert_at(
        &mut self,
        record: GroupingRecord,
        slot: Option<usize>,
    ) -> Result<usize, StoreError> {
        if self.rows.contains_key(&record.instrument_id) {
            return Err(StoreError::DuplicateKey(record.instrument_id));
        }
        let key = record.instrument_id.clone();
        match slot {
            Some(index) if index < self.rows.len() => {
                self.rows.shift_insert(index, key, record);
                Ok(index)
            }
            _ => {
                let (index, _) = self.rows.insert_full(key, record);
                Ok(index)
            }
        }
    }

    /// Remove a row, keeping the order of the remaining rows
    pub(crate) fn remove(
        &mut self,
        instrument_id: &str,
    ) -> Result<(usize, GroupingRecord), StoreError> {
        self.rows
            .shift_remove_full(instrument_id)
            .map(|(index, _, record)| (index, record))
            .ok_or_else(|| StoreError::NotFound(instrument_id.to_string()))
    }

    /// Overwrite one level, returning `(index, previous value)`
    pub(crate) fn set_group(
        &mut self,
        instrument_id: &str,
        field: GroupField,
        value: String,
    ) -> Result<(usize, String), StoreError> {
        let (index, _, record) = self
            .rows
            .get_full_mut(instrument_id)
            .ok_or_else(|| StoreError::NotFound(instrument_id.to_string()))?;
        Ok((index, record.set_group(field, value)))
    }
}
