pub mod memory;
pub mod reference_cache;
pub mod traits;

pub use memory::*;
pub use reference_cache::*;
pub use traits::*;
