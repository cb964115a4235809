use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{ReadError, WriteError};
use crate::model::{GroupingRecord, InstrumentId, Operation, OperationKind};
use crate::store::traits::{ModelReader, ModelWriter};

/// Injected write failures for the sandbox model
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    /// Fail the n-th write attempt (1-based, counted over the model's lifetime)
    pub fail_nth_write: Option<usize>,
    /// Fail any write of this kind targeting this instrument
    pub fail_matching: Vec<(OperationKind, InstrumentId)>,
    /// After the first injected failure, every later write fails as if the connection dropped
    pub unavailable_after_failure: bool,
}

/// In-process stand-in for the live tabular model.
///
/// Holds an ordered grouping table plus the instrument dimension, and records
/// every write attempt so callers can inspect the exact sequence it received.
#[derive(Debug, Default)]
pub struct InMemoryModel {
    table: RwLock<IndexMap<InstrumentId, GroupingRecord>>,
    instruments: RwLock<HashSet<InstrumentId>>,
    failures: Mutex<FailurePlan>,
    received: Mutex<Vec<Operation>>,
    writes: AtomicUsize,
    reads: AtomicUsize,
    tripped: Mutex<bool>,
}

impl InMemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the grouping table. Every grouped instrument is also registered in the dimension.
    pub fn with_groupings(records: Vec<GroupingRecord>) -> Self {
        let model = Self::new();
        {
            let mut table = model.table.write();
            let mut instruments = model.instruments.write();
            for record in records {
                instruments.insert(record.instrument_id.clone());
                table.insert(record.instrument_id.clone(), record);
            }
        }
        model
    }

    /// Register instruments known to the model that have no grouping row yet
    pub fn register_instruments<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instruments
            .write()
            .extend(ids.into_iter().map(Into::into));
    }

    pub fn set_failure_plan(&self, plan: FailurePlan) {
        *self.failures.lock() = plan;
        *self.tripped.lock() = false;
    }

    pub fn fail_on(&self, kind: OperationKind, instrument_id: impl Into<String>) {
        self.failures
            .lock()
            .fail_matching
            .push((kind, instrument_id.into()));
    }

    pub fn clear_failures(&self) {
        self.set_failure_plan(FailurePlan::default());
    }

    /// Every write attempt received, including rejected ones
    pub fn received(&self) -> Vec<Operation> {
        self.received.lock().clone()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> Vec<GroupingRecord> {
        self.table.read().values().cloned().collect()
    }

    pub fn get(&self, instrument_id: &str) -> Option<GroupingRecord> {
        self.table.read().get(instrument_id).cloned()
    }

    fn injected_failure(&self, op: &Operation, attempt: usize) -> Option<WriteError> {
        let plan = self.failures.lock();
        let mut tripped = self.tripped.lock();

        if *tripped && plan.unavailable_after_failure {
            return Some(WriteError::Unavailable("connection to model lost".to_string()));
        }

        let nth = plan.fail_nth_write == Some(attempt);
        let matching = plan
            .fail_matching
            .iter()
            .any(|(kind, id)| *kind == op.kind() && id == op.instrument_id());
        if nth || matching {
            *tripped = true;
            return Some(WriteError::Rejected(format!(
                "injected failure on write #{} ({})",
                attempt, op
            )));
        }

        None
    }

    fn write(&self, op: &Operation) -> Result<(), WriteError> {
        let mut table = self.table.write();
        match op {
            Operation::Add { record } => {
                if table.contains_key(&record.instrument_id) {
                    return Err(WriteError::Rejected(format!(
                        "row '{}' already exists",
                        record.instrument_id
                    )));
                }
                table.insert(record.instrument_id.clone(), record.clone());
            }
            Operation::Update {
                instrument_id,
                field,
                old_value,
                new_value,
            } => {
                let row = table.get_mut(instrument_id).ok_or_else(|| {
                    WriteError::Rejected(format!("row '{}' does not exist", instrument_id))
                })?;
                if row.group(*field) != old_value {
                    return Err(WriteError::Rejected(format!(
                        "row '{}' {} is '{}', expected '{}'",
                        instrument_id,
                        field,
                        row.group(*field),
                        old_value
                    )));
                }
                row.set_group(*field, new_value.clone());
            }
            Operation::Remove { instrument_id, .. } => {
                if table.shift_remove(instrument_id).is_none() {
                    return Err(WriteError::Rejected(format!(
                        "row '{}' does not exist",
                        instrument_id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ModelReader for InMemoryModel {
    async fn list_instruments(&self) -> Result<HashSet<InstrumentId>, ReadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.instruments.read().clone())
    }

    async fn fetch_current_groupings(&self) -> Result<Vec<GroupingRecord>, ReadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows())
    }
}

#[async_trait::async_trait]
impl ModelWriter for InMemoryModel {
    async fn apply_operation(&self, op: &Operation) -> Result<(), WriteError> {
        let attempt = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.received.lock().push(op.clone());

        if let Some(err) = self.injected_failure(op, attempt) {
            log::debug!("Sandbox model refusing {}: {}", op, err);
            return Err(err);
        }
        self.write(op)
    }
}
