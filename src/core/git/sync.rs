//! Repository working copies: reclone and pull.

use serde::Serialize;
use std::fs;
use std::path::Path;

use super::primitives;
use crate::error::{Error, Result};
use crate::paths::Paths;
use crate::repository::{self, Repository};
use crate::ssh::AgentSession;
use crate::utils::command::CapturedRun;
use crate::utils::io;

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub ok: bool,
    pub message: String,
}

impl SyncResult {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Start an agent holding the repository's key when its URL is SSH-style.
fn agent_for(paths: &Paths, repo: &Repository) -> Result<Option<AgentSession>> {
    if !repository::is_ssh_url(&repo.url) {
        return Ok(None);
    }
    let credential_id = repo.credential_id.ok_or_else(|| {
        Error::repository_url_invalid(&repo.url, "SSH repository has no credential attached")
    })?;

    let session = AgentSession::start(paths.child_path().to_os_string())?;
    session.add_key(&paths.private_key(credential_id))?;
    Ok(Some(session))
}

/// Clone the repository afresh beside the working copy, then swap it in.
/// A failed clone leaves the existing working copy untouched.
pub fn ensure_synced(paths: &Paths, repo: &Repository) -> SyncResult {
    let destination = paths.working_copy(repo.id);
    let staging = paths.staging_copy(repo.id);
    if let Err(e) = io::remove_dir_if_exists(&staging, "remove stale staging clone") {
        return SyncResult::failed(e.message);
    }
    if let Err(e) = io::ensure_dir(paths.project_path(), "create project path") {
        return SyncResult::failed(e.message);
    }

    let agent = match agent_for(paths, repo) {
        Ok(agent) => agent,
        Err(e) => return SyncResult::failed(e.message),
    };

    tracing::info!(repository_id = repo.id, destination = %destination.display(), "cloning");
    let run = primitives::clone(&repo.url, &staging, paths.child_path(), agent.as_ref());
    drop(agent);

    if primitives::is_fatal(&run) {
        tracing::warn!(repository_id = repo.id, stderr = %run.stderr.trim(), "clone failed");
        if let Err(e) = io::remove_dir_if_exists(&staging, "remove failed clone") {
            tracing::warn!(repository_id = repo.id, error = %e, "failed clone left behind");
        }
        return SyncResult::failed(run.stderr);
    }
    if let Err(e) = swap_in(&staging, &destination) {
        return SyncResult::failed(e.message);
    }
    SyncResult {
        ok: true,
        message: String::new(),
    }
}

fn swap_in(staging: &Path, destination: &Path) -> Result<()> {
    io::remove_dir_if_exists(destination, "remove working copy")?;
    fs::rename(staging, destination).map_err(|e| {
        Error::internal_io(
            format!("{}: {}", destination.display(), e),
            Some("move clone into place".to_string()),
        )
    })
}

/// `git pull origin HEAD` in the working copy. Never fails; problems are
/// reported through the returned run.
pub fn pull(paths: &Paths, repo: &Repository) -> CapturedRun {
    let working_copy = paths.working_copy(repo.id);
    let agent = match agent_for(paths, repo) {
        Ok(agent) => agent,
        Err(e) => {
            return CapturedRun {
                program: "git".to_string(),
                args: vec!["pull".to_string(), "origin".to_string(), "HEAD".to_string()],
                stderr: e.message,
                ..Default::default()
            }
        }
    };

    let run = primitives::pull_head(&working_copy, paths.child_path(), agent.as_ref());
    if !run.success {
        tracing::warn!(repository_id = repo.id, stderr = %run.stderr.trim(), "pull failed");
    }
    run
}

pub fn remove_working_copy(paths: &Paths, repository_id: i64) -> Result<bool> {
    io::remove_dir_if_exists(&paths.working_copy(repository_id), "remove working copy")
}
