pub mod change_set;
pub mod operation;
pub mod record;
pub mod snapshot;
pub mod validation;

pub use change_set::*;
pub use operation::*;
pub use record::*;
pub use snapshot::*;
pub use validation::*;
