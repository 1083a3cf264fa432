use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable that points at an alternate settings file.
pub const CONFIG_ENV: &str = "DBTRUN_CONFIG";

/// Root configuration structure for dbtrun.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Home directory used for `.ssh/` and `.dbt/`. Falls back to `$HOME`.
    #[serde(default)]
    pub home: Option<String>,

    /// File name prefix for generated SSH keys under `<home>/.ssh/`.
    #[serde(default = "default_ssh_key_prefix")]
    pub ssh_key_prefix: String,

    /// Directory name prefix for repository working copies.
    #[serde(default = "default_repo_prefix")]
    pub repo_prefix: String,

    /// Directory that holds every `<repo_prefix>-<id>` working copy.
    #[serde(default = "default_project_path")]
    pub project_path: String,

    /// Directory for the SQLite database and lock files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Extra directories appended to PATH for every child process.
    #[serde(default = "default_search_path")]
    pub search_path: Vec<String>,

    /// Treat a non-zero dbt exit code as a failed run.
    #[serde(default)]
    pub fail_on_nonzero_exit: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            home: None,
            ssh_key_prefix: default_ssh_key_prefix(),
            repo_prefix: default_repo_prefix(),
            project_path: default_project_path(),
            data_dir: default_data_dir(),
            search_path: default_search_path(),
            fail_on_nonzero_exit: false,
        }
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_ssh_key_prefix() -> String {
    "git-django_".to_string()
}

fn default_repo_prefix() -> String {
    "external-repo".to_string()
}

fn default_project_path() -> String {
    "~/.local/share/dbtrun".to_string()
}

fn default_data_dir() -> String {
    "~/.config/dbtrun".to_string()
}

fn default_search_path() -> Vec<String> {
    vec!["/usr/bin".to_string(), "/bin".to_string()]
}

/// Default settings file location (`~/.config/dbtrun/dbtrun.json`).
pub fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| {
        Error::internal_unexpected("HOME environment variable not set".to_string())
    })?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("dbtrun")
        .join("dbtrun.json"))
}

impl Settings {
    /// Load settings from `$DBTRUN_CONFIG` or the default location.
    ///
    /// A missing file is not an error: every field has a default.
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => default_config_path()?,
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
        })?;

        serde_json::from_str(&raw)
            .map_err(|e| Error::config_invalid_json(path.to_string_lossy(), e))
    }

    /// Resolve the home directory: explicit setting first, then `$HOME`.
    pub fn resolve_home(&self) -> Result<PathBuf> {
        if let Some(home) = self.home.as_deref().filter(|h| !h.is_empty()) {
            return Ok(PathBuf::from(shellexpand::tilde(home).into_owned()));
        }

        std::env::var("HOME").map(PathBuf::from).map_err(|_| {
            Error::config_invalid_value(
                "home",
                None,
                "HOME is not set and no home directory is configured",
            )
        })
    }

    /// PATH value for child processes: inherited PATH plus `search_path`.
    pub fn child_path(&self) -> OsString {
        let mut entries: Vec<PathBuf> = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();

        for extra in &self.search_path {
            let extra = PathBuf::from(extra);
            if !entries.contains(&extra) {
                entries.push(extra);
            }
        }

        std::env::join_paths(entries).unwrap_or_else(|_| OsString::from("/usr/bin:/bin"))
    }
}
