//! Exclusive file locks around shared on-disk state.
//!
//! A repository lock covers its working copy: pulls, dbt writing
//! `target/` and recloning. The profile mirror lock covers the single
//! `profiles.yml` from the moment it is written until dbt has read it.
//! Locks are always taken repository first, then mirror.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::utils::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Repository(i64),
    ProfileMirror,
}

impl LockScope {
    fn file_name(&self) -> String {
        match self {
            LockScope::Repository(id) => format!("repo-{}.lock", id),
            LockScope::ProfileMirror => "profile-mirror.lock".to_string(),
        }
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct HeldLock {
    file: File,
    path: PathBuf,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

fn lock_path(locks_dir: &Path, scope: LockScope) -> PathBuf {
    locks_dir.join(scope.file_name())
}

fn open(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        io::ensure_dir(parent, "create lock directory")?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| lock_error(path, e, "open lock"))
}

fn lock_error(path: &Path, e: std::io::Error, operation: &str) -> Error {
    Error::internal_io(
        format!("{}: {}", path.display(), e),
        Some(operation.to_string()),
    )
}

/// Block until the lock is free.
pub fn acquire(locks_dir: &Path, scope: LockScope) -> Result<HeldLock> {
    let path = lock_path(locks_dir, scope);
    let file = open(&path)?;
    file.lock_exclusive()
        .map_err(|e| lock_error(&path, e, "acquire lock"))?;
    tracing::debug!(scope = ?scope, "lock acquired");
    Ok(HeldLock { file, path })
}

/// Take the lock only if nobody holds it.
pub fn try_acquire(locks_dir: &Path, scope: LockScope) -> Result<Option<HeldLock>> {
    let path = lock_path(locks_dir, scope);
    let file = open(&path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(HeldLock { file, path })),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
        Err(e) => Err(lock_error(&path, e, "acquire lock")),
    }
}

/// Try first so a wait is visible in the logs, then block.
pub fn acquire_logged(locks_dir: &Path, scope: LockScope) -> Result<HeldLock> {
    if let Some(held) = try_acquire(locks_dir, scope)? {
        return Ok(held);
    }
    tracing::info!(scope = ?scope, "waiting for lock");
    acquire(locks_dir, scope)
}
