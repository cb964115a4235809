use std::collections::HashSet;

use crate::error::{ReadError, WriteError};
use crate::model::{GroupingRecord, InstrumentId, Operation};

/// Read access to the live tabular model
#[async_trait::async_trait]
pub trait ModelReader: Send + Sync {
    /// Every instrument the model's instrument dimension knows about
    async fn list_instruments(&self) -> Result<HashSet<InstrumentId>, ReadError>;
    /// The grouping table as it currently exists in the model, with metadata joined
    async fn fetch_current_groupings(&self) -> Result<Vec<GroupingRecord>, ReadError>;
}

/// Write access to the live tabular model.
///
/// Implementations must guarantee that applying `op.inverse()` after an accepted `op`
/// restores the prior remote state. Timeouts are the implementation's concern.
#[async_trait::async_trait]
pub trait ModelWriter: Send + Sync {
    async fn apply_operation(&self, op: &Operation) -> Result<(), WriteError>;
}

pub trait Model: ModelReader + ModelWriter + Send + Sync {}
impl<T: ModelReader + ModelWriter> Model for T {}
