//! Repository registration.
//!
//! A repository is only kept if its first clone succeeds.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, GitCloneFailedDetails, Result};
use crate::git;
use crate::lock::{self, LockScope};
use crate::paths::Paths;
use crate::store::Store;

/// Substring an HTTPS URL must carry to be accepted (a GitHub token).
pub const TOKEN_MARKER: &str = "ghp";

#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    pub id: i64,
    pub name: Option<String>,
    pub url: String,
    pub credential_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    /// Display name, falling back to the URL.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisteredRepository {
    #[serde(flatten)]
    pub repository: Repository,
    pub working_copy: String,
}

/// Changes applied by [`update`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct RepositoryUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub credential_id: Option<Option<i64>>,
}

pub fn is_ssh_url(url: &str) -> bool {
    url.starts_with("git")
}

pub fn is_https_url(url: &str) -> bool {
    url.starts_with("http")
}

/// Check the SSH-needs-credential and HTTPS-needs-token conventions.
pub fn validate_url(url: &str, credential_id: Option<i64>) -> Result<()> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(Error::repository_url_invalid(url, "Repository URL is empty"));
    }
    if trimmed.starts_with('-') {
        return Err(Error::repository_url_invalid(url, "Repository URL cannot start with '-'"));
    }
    if is_ssh_url(trimmed) && credential_id.is_none() {
        return Err(Error::repository_url_invalid(
            url,
            "SSH key is required for git urls",
        ));
    }
    if is_https_url(trimmed) && !trimmed.contains(TOKEN_MARKER) {
        return Err(Error::repository_url_invalid(
            url,
            "Token is required for http urls",
        ));
    }
    Ok(())
}

fn check_credential(
    store: &Store,
    credential_id: Option<i64>,
    repository_id: Option<i64>,
) -> Result<()> {
    let Some(credential_id) = credential_id else {
        return Ok(());
    };
    store.get_credential(credential_id)?;
    match store.repository_for_credential(credential_id)? {
        Some(owner) if Some(owner) != repository_id => {
            Err(Error::credential_in_use(credential_id, owner))
        }
        _ => Ok(()),
    }
}

fn clone_error(paths: &Paths, repository: &Repository, stderr: String) -> Error {
    Error::git_clone_failed(GitCloneFailedDetails {
        url: repository.url.clone(),
        destination: paths
            .working_copy(repository.id)
            .to_string_lossy()
            .to_string(),
        stderr,
    })
}

/// Insert the repository and clone it. A failed clone deletes the row again.
pub fn register(
    store: &Store,
    paths: &Paths,
    name: Option<&str>,
    url: &str,
    credential_id: Option<i64>,
) -> Result<RegisteredRepository> {
    let url = url.trim();
    validate_url(url, credential_id)?;
    check_credential(store, credential_id, None)?;

    let repository = store.insert_repository(name, url, credential_id)?;
    let result = git::ensure_synced(paths, &repository);
    if !result.ok {
        store.delete_repository(repository.id)?;
        git::remove_working_copy(paths, repository.id)?;
        tracing::warn!(repository_id = repository.id, "registration rolled back");
        return Err(clone_error(paths, &repository, result.message));
    }

    tracing::info!(repository_id = repository.id, "repository registered");
    Ok(RegisteredRepository {
        working_copy: paths
            .working_copy(repository.id)
            .to_string_lossy()
            .to_string(),
        repository,
    })
}

/// Re-point a repository. The new settings are only stored once a fresh
/// clone with them succeeds; until then the old working copy stays.
pub fn update(
    store: &Store,
    paths: &Paths,
    repository_id: i64,
    changes: RepositoryUpdate,
) -> Result<RegisteredRepository> {
    let mut repository = store.get_repository(repository_id)?;
    if let Some(name) = changes.name {
        repository.name = Some(name);
    }
    if let Some(url) = changes.url {
        repository.url = url.trim().to_string();
    }
    if let Some(credential_id) = changes.credential_id {
        repository.credential_id = credential_id;
    }

    validate_url(&repository.url, repository.credential_id)?;
    check_credential(store, repository.credential_id, Some(repository.id))?;

    let _lock = lock::acquire_logged(&paths.locks(), LockScope::Repository(repository_id))?;
    let result = git::ensure_synced(paths, &repository);
    if !result.ok {
        return Err(clone_error(paths, &repository, result.message));
    }
    store.update_repository(&repository)?;

    tracing::info!(repository_id, "repository updated");
    Ok(RegisteredRepository {
        working_copy: paths.working_copy(repository_id).to_string_lossy().to_string(),
        repository,
    })
}

/// Clone the repository again without changing it.
pub fn sync(store: &Store, paths: &Paths, repository_id: i64) -> Result<git::SyncResult> {
    let repository = store.get_repository(repository_id)?;
    let _lock = lock::acquire_logged(&paths.locks(), LockScope::Repository(repository_id))?;
    Ok(git::ensure_synced(paths, &repository))
}

/// Delete the row and the working copy. Jobs keep running without it.
pub fn remove(store: &Store, paths: &Paths, repository_id: i64) -> Result<bool> {
    store.get_repository(repository_id)?;
    let _lock = lock::acquire_logged(&paths.locks(), LockScope::Repository(repository_id))?;
    let removed_copy = git::remove_working_copy(paths, repository_id)?;
    store.delete_repository(repository_id)?;
    tracing::info!(repository_id, removed_copy, "repository deleted");
    Ok(removed_copy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use std::path::Path;

    fn paths_in(root: &Path) -> Paths {
        let settings = Settings {
            home: Some(root.join("home").to_string_lossy().to_string()),
            project_path: root.join("projects").to_string_lossy().to_string(),
            ..Settings::default()
        };
        Paths::resolve(&settings).unwrap()
    }

    #[test]
    fn ssh_url_requires_credential() {
        let err = validate_url("git@github.com:acme/analytics.git", None).unwrap_err();
        assert_eq!(err.code.as_str(), "repository.url_invalid");
        assert!(validate_url("git@github.com:acme/analytics.git", Some(1)).is_ok());
    }

    #[test]
    fn https_url_requires_token_marker() {
        assert!(validate_url("https://github.com/acme/analytics.git", None).is_err());
        assert!(validate_url("https://ghp_abc123@github.com/acme/analytics.git", None).is_ok());
    }

    #[test]
    fn option_like_url_is_rejected() {
        assert!(validate_url("--upload-pack=touch /tmp/x", None).is_err());
    }

    #[test]
    fn failed_clone_leaves_no_row() {
        let root = tempfile::tempdir().unwrap();
        let paths = paths_in(root.path());
        let store = Store::open_in_memory().unwrap();
        let missing = root.path().join("no-such-origin").to_string_lossy().to_string();

        let err = register(&store, &paths, Some("broken"), &missing, None).unwrap_err();

        assert_eq!(err.code.as_str(), "git.clone_failed");
        assert!(err.message.starts_with("Error creating repo:"));
        assert!(store.list_repositories().unwrap().is_empty());
    }

    #[test]
    fn credential_cannot_serve_two_repositories() {
        let store = Store::open_in_memory().unwrap();
        let credential = store.insert_credential("deploy").unwrap();
        let first = store
            .insert_repository(None, "git@github.com:acme/a.git", Some(credential.id))
            .unwrap();

        let err = check_credential(&store, Some(credential.id), None).unwrap_err();
        assert_eq!(err.code.as_str(), "credential.in_use");
        assert!(check_credential(&store, Some(credential.id), Some(first.id)).is_ok());
    }

    #[test]
    fn remove_clears_working_copy_and_nulls_jobs() {
        let root = tempfile::tempdir().unwrap();
        let paths = paths_in(root.path());
        let store = Store::open_in_memory().unwrap();
        let repo = store.insert_repository(Some("a"), "/srv/a", None).unwrap();
        std::fs::create_dir_all(paths.working_copy(repo.id).join("models")).unwrap();
        let job = store
            .insert_job(&crate::job::JobSpec {
                name: "nightly".to_string(),
                repository_id: Some(repo.id),
                args: vec!["dbt run".to_string()],
                ..Default::default()
            })
            .unwrap();

        assert!(remove(&store, &paths, repo.id).unwrap());
        assert!(!paths.working_copy(repo.id).exists());
        assert_eq!(store.get_job(job.id).unwrap().repository_id, None);
    }
}
