//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Child process execution from argument vectors
//! - `io` - File I/O with consistent error handling
//! - `shell` - Shell-style quoting and word splitting
//! - `validation` - Input validation helpers

pub mod command;
pub mod io;
pub mod shell;
pub mod validation;
