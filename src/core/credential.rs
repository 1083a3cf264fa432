//! SSH key pairs for repository access.
//!
//! The key files under `<home>/.ssh/` are the source of truth; the database
//! row only reserves the identity used to name them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::Paths;
use crate::store::Store;
use crate::utils::command::ProcessSpec;
use crate::utils::io;

#[derive(Debug, Clone, Serialize)]
pub struct Credential {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialView {
    #[serde(flatten)]
    pub credential: Credential,
    pub private_key_path: String,
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_id: Option<i64>,
}

/// Generate a 4096-bit RSA key pair for `credential_id`.
///
/// Best-effort: a missing or failing `ssh-keygen` is logged, not returned.
/// Callers learn about it from [`public_key`].
pub fn generate(paths: &Paths, credential_id: i64) -> Result<()> {
    let key_path = paths.private_key(credential_id);
    io::ensure_dir(&paths.ssh_dir(), "create ssh directory")?;

    let run = ProcessSpec::new("ssh-keygen")
        .args(["-t", "rsa", "-b", "4096", "-f"])
        .arg(key_path.to_string_lossy())
        .args(["-N", "", "-C"])
        .arg(format!("dbtrun-{}", credential_id))
        .env("PATH", paths.child_path())
        .run_captured();

    if !run.success {
        tracing::warn!(
            credential_id,
            exit_code = ?run.exit_code,
            stderr = %run.stderr.trim(),
            "ssh-keygen failed; credential has no key pair"
        );
    }
    Ok(())
}

/// Public key text (first line of the `.pub` file).
pub fn public_key(paths: &Paths, credential_id: i64) -> Result<String> {
    let pub_path = paths.public_key(credential_id);
    let content = fs::read_to_string(&pub_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::credential_key_not_found(credential_id, pub_path.to_string_lossy())
        } else {
            Error::internal_io(e.to_string(), Some("read ssh public key".to_string()))
        }
    })?;
    Ok(content.lines().next().unwrap_or_default().trim().to_string())
}

fn remove_key_file(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| {
        Error::internal_io(
            format!("{}: {}", path.display(), e),
            Some("delete ssh key".to_string()),
        )
    })
}

/// Remove the private then the public key file. Both must exist.
pub fn delete(paths: &Paths, credential_id: i64) -> Result<()> {
    remove_key_file(&paths.private_key(credential_id))?;
    remove_key_file(&paths.public_key(credential_id))
}

/// Reserve an identity and generate its key pair.
pub fn create(store: &Store, paths: &Paths, name: &str) -> Result<CredentialView> {
    let credential = store.insert_credential(name)?;
    generate(paths, credential.id)?;
    tracing::info!(credential_id = credential.id, "credential created");
    view(paths, credential, None)
}

pub fn show(store: &Store, paths: &Paths, credential_id: i64) -> Result<CredentialView> {
    let credential = store.get_credential(credential_id)?;
    let repository_id = store.repository_for_credential(credential_id)?;
    view(paths, credential, repository_id)
}

pub fn list(store: &Store, paths: &Paths) -> Result<Vec<CredentialView>> {
    store
        .list_credentials()?
        .into_iter()
        .map(|c| {
            let repository_id = store.repository_for_credential(c.id)?;
            view(paths, c, repository_id)
        })
        .collect()
}

fn view(
    paths: &Paths,
    credential: Credential,
    repository_id: Option<i64>,
) -> Result<CredentialView> {
    let public_key = match public_key(paths, credential.id) {
        Ok(key) => Some(key),
        Err(e) if e.code.is_not_found() => None,
        Err(e) => return Err(e),
    };
    Ok(CredentialView {
        private_key_path: paths.private_key(credential.id).to_string_lossy().to_string(),
        credential,
        public_key,
        repository_id,
    })
}

/// Delete the key files and the row. Refused while a repository uses the
/// credential. With `force`, missing key files are tolerated.
pub fn remove(store: &Store, paths: &Paths, credential_id: i64, force: bool) -> Result<()> {
    store.get_credential(credential_id)?;
    if let Some(repository_id) = store.repository_for_credential(credential_id)? {
        return Err(Error::credential_in_use(credential_id, repository_id));
    }

    match delete(paths, credential_id) {
        Ok(()) => {}
        Err(e) if force => {
            tracing::warn!(credential_id, error = %e, "ignoring key removal failure");
            let _ = fs::remove_file(paths.private_key(credential_id));
            let _ = fs::remove_file(paths.public_key(credential_id));
        }
        Err(e) => return Err(e),
    }

    store.delete_credential(credential_id)?;
    tracing::info!(credential_id, "credential deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    fn paths_in(home: &Path) -> Paths {
        let settings = Settings {
            home: Some(home.to_string_lossy().to_string()),
            ..Settings::default()
        };
        Paths::resolve(&settings).unwrap()
    }

    fn write_pair(paths: &Paths, id: i64) {
        fs::create_dir_all(paths.ssh_dir()).unwrap();
        fs::write(paths.private_key(id), "PRIVATE").unwrap();
        fs::write(paths.public_key(id), "ssh-rsa AAAA dbtrun-1\n").unwrap();
    }

    #[test]
    fn public_key_reads_first_line() {
        let home = tempfile::tempdir().unwrap();
        let paths = paths_in(home.path());
        write_pair(&paths, 1);

        assert_eq!(public_key(&paths, 1).unwrap(), "ssh-rsa AAAA dbtrun-1");
    }

    #[test]
    fn public_key_absent_is_not_found() {
        let home = tempfile::tempdir().unwrap();
        let paths = paths_in(home.path());

        let err = public_key(&paths, 9).unwrap_err();
        assert_eq!(err.code.as_str(), "credential.key_not_found");
        assert!(err.code.is_not_found());
    }

    #[test]
    fn delete_twice_fails_clearly() {
        let home = tempfile::tempdir().unwrap();
        let paths = paths_in(home.path());
        write_pair(&paths, 3);

        delete(&paths, 3).unwrap();
        assert!(!paths.private_key(3).exists());
        assert!(!paths.public_key(3).exists());

        let err = delete(&paths, 3).unwrap_err();
        assert_eq!(err.code.as_str(), "internal.io_error");
        assert!(err.message.contains("git-django_3"));
    }

    #[test]
    fn delete_requires_both_files() {
        let home = tempfile::tempdir().unwrap();
        let paths = paths_in(home.path());
        write_pair(&paths, 4);
        fs::remove_file(paths.public_key(4)).unwrap();

        assert!(delete(&paths, 4).is_err());
        assert!(!paths.private_key(4).exists());
    }

    #[test]
    fn generate_creates_pair_when_keygen_available() {
        let home = tempfile::tempdir().unwrap();
        let paths = paths_in(home.path());

        generate(&paths, 5).unwrap();
        if paths.private_key(5).exists() {
            assert!(public_key(&paths, 5).unwrap().starts_with("ssh-rsa "));
        }
    }

    #[test]
    fn remove_refuses_attached_credential() {
        let home = tempfile::tempdir().unwrap();
        let paths = paths_in(home.path());
        let store = Store::open_in_memory().unwrap();
        let credential = store.insert_credential("deploy").unwrap();
        write_pair(&paths, credential.id);
        let repo = store
            .insert_repository(None, "git@github.com:acme/analytics.git", Some(credential.id))
            .unwrap();

        let err = remove(&store, &paths, credential.id, false).unwrap_err();
        assert_eq!(err.code.as_str(), "credential.in_use");
        assert_eq!(err.details["repositoryId"], repo.id.to_string());
        assert!(paths.private_key(credential.id).exists());
    }

    #[test]
    fn force_remove_tolerates_missing_files() {
        let home = tempfile::tempdir().unwrap();
        let paths = paths_in(home.path());
        let store = Store::open_in_memory().unwrap();
        let credential = store.insert_credential("stale").unwrap();

        assert!(remove(&store, &paths, credential.id, false).is_err());
        remove(&store, &paths, credential.id, true).unwrap();
        assert!(store.get_credential(credential.id).is_err());
    }
}
