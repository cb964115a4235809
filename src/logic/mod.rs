pub mod apply;
pub mod diff;
pub mod engine;
pub mod filter;
pub mod grouping_store;
pub mod history;
pub mod preview;
pub mod session;
pub mod validate;

pub use apply::*;
pub use diff::*;
pub use engine::*;
pub use filter::*;
pub use grouping_store::*;
pub use history::{UndoHistory, DEFAULT_HISTORY_LIMIT};
// Preview functions stay namespaced (`preview::format`)
pub use preview::{PreviewRow, PreviewSummary};
pub use session::*;
pub use validate::*;
