use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::settings::Settings;

/// Names of the result artifacts dbt writes under `target/`.
pub const ARTIFACT_NAMES: [&str; 4] = ["manifest", "run_results", "sources", "catalog"];

/// Resolved filesystem layout. Every component receives one of these
/// instead of reading ambient settings.
#[derive(Debug, Clone)]
pub struct Paths {
    home: PathBuf,
    project_path: PathBuf,
    data_dir: PathBuf,
    ssh_key_prefix: String,
    repo_prefix: String,
    child_path: OsString,
}

fn expand(raw: &str, home: &Path) -> PathBuf {
    let expanded =
        shellexpand::tilde_with_context(raw, || Some(home.to_string_lossy().into_owned()));
    PathBuf::from(expanded.into_owned())
}

impl Paths {
    pub fn resolve(settings: &Settings) -> Result<Self> {
        let home = settings.resolve_home()?;
        Ok(Self {
            project_path: expand(&settings.project_path, &home),
            data_dir: expand(&settings.data_dir, &home),
            ssh_key_prefix: settings.ssh_key_prefix.clone(),
            repo_prefix: settings.repo_prefix.clone(),
            child_path: settings.child_path(),
            home,
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// PATH handed to every child process.
    pub fn child_path(&self) -> &OsStr {
        &self.child_path
    }

    /// `<home>/.ssh`
    pub fn ssh_dir(&self) -> PathBuf {
        self.home.join(".ssh")
    }

    /// `<home>/.ssh/<prefix><credential-id>`
    pub fn private_key(&self, credential_id: i64) -> PathBuf {
        self.ssh_dir()
            .join(format!("{}{}", self.ssh_key_prefix, credential_id))
    }

    /// `<home>/.ssh/<prefix><credential-id>.pub`
    pub fn public_key(&self, credential_id: i64) -> PathBuf {
        self.ssh_dir()
            .join(format!("{}{}.pub", self.ssh_key_prefix, credential_id))
    }

    /// `<project-path>/<repo-prefix>-<repository-id>`
    pub fn working_copy(&self, repository_id: i64) -> PathBuf {
        self.project_path
            .join(format!("{}-{}", self.repo_prefix, repository_id))
    }

    /// `<project-path>/.<repo-prefix>-<repository-id>.staging`, where a fresh
    /// clone lands before replacing the working copy.
    pub fn staging_copy(&self, repository_id: i64) -> PathBuf {
        self.project_path
            .join(format!(".{}-{}.staging", self.repo_prefix, repository_id))
    }

    /// `<working-copy>/target`
    pub fn artifacts_dir(&self, repository_id: i64) -> PathBuf {
        self.working_copy(repository_id).join("target")
    }

    /// Shared dbt profile mirror: `<home>/.dbt/profiles.yml`
    pub fn profile_mirror(&self) -> PathBuf {
        self.home.join(".dbt").join("profiles.yml")
    }

    pub fn database(&self) -> PathBuf {
        self.data_dir.join("dbtrun.db")
    }

    pub fn locks(&self) -> PathBuf {
        self.data_dir.join("locks")
    }
}
