// Public modules
pub mod artifacts;
pub mod context;
pub mod credential;
pub mod error;
pub mod git;
pub mod job;
pub mod lock;
pub mod paths;
pub mod profile;
pub mod repository;
pub mod runner;
pub mod settings;
pub mod ssh;
pub mod store;
pub mod versions;

// Re-export common types for convenience
pub use context::Context;
pub use error::{Error, ErrorCode, Result};
pub use runner::RunState;
pub use store::ledger::{RunRecord, RunStatus};
