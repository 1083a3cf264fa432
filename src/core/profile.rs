//! dbt profile YAML storage and the shared `profiles.yml` mirror.
//!
//! Only one profile is active on disk at a time: every save or run rewrites
//! `<home>/.dbt/profiles.yml`. Last write wins.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::lock::{self, LockScope};
use crate::paths::Paths;
use crate::store::Store;
use crate::utils::io;

pub const MAX_PROFILES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileName {
    #[serde(rename = "DEV")]
    Dev,
    #[serde(rename = "PROD")]
    Prod,
}

impl ProfileName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileName::Dev => "DEV",
            ProfileName::Prod => "PROD",
        }
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEV" => Ok(ProfileName::Dev),
            "PROD" => Ok(ProfileName::Prod),
            _ => Err(Error::validation_invalid_argument(
                "name",
                format!("Unknown profile name '{}'", s),
                Some(s.to_string()),
                Some(vec!["DEV".to_string(), "PROD".to_string()]),
            )),
        }
    }
}

impl ToSql for ProfileName {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ProfileName {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: Error| FromSqlError::Other(e.message.into()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: i64,
    pub name: ProfileName,
    pub yaml: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedProfile {
    #[serde(flatten)]
    pub profile: Profile,
    pub mirror_path: String,
    pub sha256: String,
}

/// Parse profile YAML. The document must be a mapping of profile names.
pub fn validate(yaml: &str) -> Result<serde_yml::Value> {
    let value: serde_yml::Value = serde_yml::from_str(yaml)
        .map_err(|e| Error::config_invalid_yaml(e.to_string(), Some("profile yml".to_string())))?;

    if !value.is_mapping() {
        return Err(Error::config_invalid_yaml(
            "profiles.yml must be a mapping of profile names",
            Some("profile yml".to_string()),
        ));
    }
    Ok(value)
}

/// Validate, re-serialize and write the YAML to the shared mirror path.
/// Returns the sha256 of the written text. Callers hold the mirror lock.
pub fn mirror(paths: &Paths, yaml: &str) -> Result<String> {
    let value = validate(yaml)?;
    let normalized = serde_yml::to_string(&value).map_err(|e| {
        Error::config_invalid_yaml(e.to_string(), Some("serialize profile yml".to_string()))
    })?;

    let target = paths.profile_mirror();
    io::write_file_atomic(&target, &normalized, "write profiles.yml")?;

    let digest = format!("{:x}", Sha256::digest(normalized.as_bytes()));
    tracing::debug!(path = %target.display(), sha256 = %digest, "profile mirrored");
    Ok(digest)
}

/// Create or update the named profile and make it the active mirror.
pub fn save(store: &Store, paths: &Paths, name: ProfileName, yaml: &str) -> Result<SavedProfile> {
    if store.find_profile(name)?.is_none() && store.count_profiles()? >= MAX_PROFILES {
        return Err(Error::profile_limit_reached(MAX_PROFILES));
    }

    let sha256 = {
        let _mirror = lock::acquire_logged(&paths.locks(), LockScope::ProfileMirror)?;
        mirror(paths, yaml)?
    };
    let profile = store.upsert_profile(name, yaml)?;
    tracing::info!(profile = %name, "profile saved");

    Ok(SavedProfile {
        profile,
        mirror_path: paths.profile_mirror().to_string_lossy().to_string(),
        sha256,
    })
}

/// Mirror a stored profile without changing it.
pub fn activate(store: &Store, paths: &Paths, profile_id: i64) -> Result<SavedProfile> {
    let profile = store.get_profile(profile_id)?;
    let sha256 = {
        let _mirror = lock::acquire_logged(&paths.locks(), LockScope::ProfileMirror)?;
        mirror(paths, &profile.yaml)?
    };
    Ok(SavedProfile {
        profile,
        mirror_path: paths.profile_mirror().to_string_lossy().to_string(),
        sha256,
    })
}

pub fn remove(store: &Store, profile_id: i64) -> Result<()> {
    if !store.delete_profile(profile_id)? {
        return Err(Error::profile_not_found(profile_id));
    }
    tracing::info!(profile_id, "profile deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use std::fs;

    const DEV_YAML: &str =
        "analytics:\n  target: dev\n  outputs:\n    dev:\n      type: postgres\n      threads: 4\n";

    fn setup() -> (tempfile::TempDir, Paths, Store) {
        let home = tempfile::tempdir().unwrap();
        let settings = Settings {
            home: Some(home.path().to_string_lossy().to_string()),
            ..Settings::default()
        };
        let paths = Paths::resolve(&settings).unwrap();
        (home, paths, Store::open_in_memory().unwrap())
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("dev".parse::<ProfileName>().unwrap(), ProfileName::Dev);
        assert_eq!("PROD".parse::<ProfileName>().unwrap(), ProfileName::Prod);
        assert!("staging".parse::<ProfileName>().is_err());
    }

    #[test]
    fn invalid_yaml_is_config_error() {
        let err = validate("analytics: [unclosed").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_yaml");
    }

    #[test]
    fn scalar_document_is_rejected() {
        assert!(validate("just text").is_err());
    }

    #[test]
    fn mirror_creates_dbt_dir_and_hashes_content() {
        let (_home, paths, _store) = setup();

        let digest = mirror(&paths, DEV_YAML).unwrap();
        let written = fs::read_to_string(paths.profile_mirror()).unwrap();

        assert_eq!(digest, format!("{:x}", Sha256::digest(written.as_bytes())));
        let reparsed: serde_yml::Value = serde_yml::from_str(&written).unwrap();
        assert_eq!(reparsed, validate(DEV_YAML).unwrap());
    }

    #[test]
    fn save_waits_while_a_run_holds_the_mirror() {
        let (_home, paths, store) = setup();
        let held = lock::acquire(&paths.locks(), LockScope::ProfileMirror).unwrap();
        let mirror_path = paths.profile_mirror();

        let worker = std::thread::spawn(move || {
            save(&store, &paths, ProfileName::Dev, DEV_YAML).map(|saved| saved.sha256)
        });
        std::thread::sleep(std::time::Duration::from_millis(300));
        assert!(!mirror_path.exists());

        drop(held);
        assert!(!worker.join().unwrap().unwrap().is_empty());
        assert!(mirror_path.exists());
    }

    #[test]
    fn last_save_wins_on_mirror() {
        let (_home, paths, store) = setup();

        save(&store, &paths, ProfileName::Dev, DEV_YAML).unwrap();
        save(&store, &paths, ProfileName::Prod, "analytics:\n  target: prod\n").unwrap();

        let written = fs::read_to_string(paths.profile_mirror()).unwrap();
        assert!(written.contains("prod"));
        assert!(!written.contains("postgres"));
    }

    #[test]
    fn updating_existing_name_keeps_one_row() {
        let (_home, paths, store) = setup();

        let first = save(&store, &paths, ProfileName::Dev, DEV_YAML).unwrap();
        let second =
            save(&store, &paths, ProfileName::Dev, "analytics:\n  target: dev2\n").unwrap();

        assert_eq!(first.profile.id, second.profile.id);
        assert_eq!(store.count_profiles().unwrap(), 1);
        assert!(second.profile.yaml.contains("dev2"));
    }

    #[test]
    fn invalid_yaml_leaves_mirror_untouched() {
        let (_home, paths, store) = setup();
        save(&store, &paths, ProfileName::Dev, DEV_YAML).unwrap();
        let before = fs::read_to_string(paths.profile_mirror()).unwrap();

        assert!(save(&store, &paths, ProfileName::Prod, "a: [").is_err());
        assert_eq!(fs::read_to_string(paths.profile_mirror()).unwrap(), before);
        assert!(store.find_profile(ProfileName::Prod).unwrap().is_none());
    }
}
