//! File I/O primitives with consistent error handling.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Read file contents with standardized error handling.
pub fn read_file(path: &Path, operation: &str) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))
}

/// Create a directory and its parents if missing.
pub fn ensure_dir(dir: &Path, operation: &str) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))?;
    }
    Ok(())
}

/// Write content to file atomically (write to .tmp, then rename).
///
/// Readers of the destination see either the old or the new content,
/// never a partial write. The parent directory is created if missing.
pub fn write_file_atomic(path: &Path, content: &str, operation: &str) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::internal_io(
            format!("Invalid path: {}", path.display()),
            Some(operation.to_string()),
        )
    })?;

    let filename = path.file_name().ok_or_else(|| {
        Error::internal_io(
            format!("Invalid path: {}", path.display()),
            Some(operation.to_string()),
        )
    })?;

    ensure_dir(parent, operation)?;

    let tmp_path = parent.join(format!("{}.tmp", filename.to_string_lossy()));

    fs::write(&tmp_path, content).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("{} (write temp)", operation)))
    })?;

    fs::rename(&tmp_path, path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("{} (rename)", operation))))?;

    Ok(())
}

/// Remove a directory tree if it exists.
pub fn remove_dir_if_exists(dir: &Path, operation: &str) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    fs::remove_dir_all(dir)
        .map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))?;
    Ok(true)
}
