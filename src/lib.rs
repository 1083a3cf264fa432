pub mod core;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `dbtrun::runner` instead of `dbtrun::core::runner`
pub use core::*;
pub use utils::*;
