//! Installed dbt package versions, read from `dbt --version`.

use regex::Regex;
use serde::Serialize;
use std::ffi::OsStr;

use crate::error::{Error, Result};
use crate::utils::command::ProcessSpec;

pub const PACKAGES: [&str; 5] = [
    "dbt-core",
    "dbt-postgres",
    "dbt-redshift",
    "dbt-snowflake",
    "dbt-bigquery",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageVersion {
    pub module_name: String,
    pub version: Option<String>,
}

/// Parse both the 1.x layout (`Core: - installed: 1.7.4`, `Plugins: - postgres: 1.7.4`)
/// and the older `installed version: 0.21.0` layout.
pub fn parse_version_output(output: &str) -> Result<Vec<PackageVersion>> {
    let core = Regex::new(r"(?m)installed(?: version)?:\s*v?([0-9][0-9A-Za-z.\-+]*)")
        .map_err(|e| Error::internal_unexpected(e.to_string()))?;
    let plugin = Regex::new(r"(?m)^\s*-\s*([a-z]+):\s*v?([0-9][0-9A-Za-z.\-+]*)")
        .map_err(|e| Error::internal_unexpected(e.to_string()))?;

    let core_version = core
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let plugins: Vec<(String, String)> = plugin
        .captures_iter(output)
        .filter_map(|c| Some((c.get(1)?.as_str().to_string(), c.get(2)?.as_str().to_string())))
        .collect();

    Ok(PACKAGES
        .iter()
        .map(|package| {
            let version = match package.strip_prefix("dbt-") {
                Some("core") => core_version.clone(),
                Some(adapter) => plugins
                    .iter()
                    .find(|(name, _)| name == adapter)
                    .map(|(_, v)| v.clone()),
                None => None,
            };
            PackageVersion {
                module_name: package.to_string(),
                version,
            }
        })
        .collect())
}

/// Every known package, with `None` for the ones not installed.
pub fn installed(child_path: &OsStr) -> Result<Vec<PackageVersion>> {
    let run = ProcessSpec::new("dbt")
        .arg("--version")
        .env("PATH", child_path)
        .merge_stderr()
        .run_captured();

    if run.exit_code.is_none() {
        tracing::debug!(error = %run.stderr.trim(), "dbt not available");
    }
    parse_version_output(&run.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version_of<'a>(report: &'a [PackageVersion], name: &str) -> Option<&'a str> {
        report
            .iter()
            .find(|p| p.module_name == name)
            .and_then(|p| p.version.as_deref())
    }

    #[test]
    fn parses_current_layout() {
        let output = "Core:\n  - installed: 1.7.4\n  - latest:    1.7.4 - Up to date!\n\n\
                      Plugins:\n  - postgres:  1.7.4 - Up to date!\n\
                      \x20 - snowflake: 1.7.1 - Update available!\n";

        let report = parse_version_output(output).unwrap();

        assert_eq!(report.len(), 5);
        assert_eq!(version_of(&report, "dbt-core"), Some("1.7.4"));
        assert_eq!(version_of(&report, "dbt-postgres"), Some("1.7.4"));
        assert_eq!(version_of(&report, "dbt-snowflake"), Some("1.7.1"));
        assert_eq!(version_of(&report, "dbt-bigquery"), None);
    }

    #[test]
    fn parses_legacy_layout() {
        let output = "installed version: 0.21.0\n   latest version: 1.0.0\n\n\
                      Plugins:\n  - redshift: 0.21.0\n";

        let report = parse_version_output(output).unwrap();
        assert_eq!(version_of(&report, "dbt-core"), Some("0.21.0"));
        assert_eq!(version_of(&report, "dbt-redshift"), Some("0.21.0"));
    }

    #[test]
    fn missing_dbt_reports_nothing_installed() {
        let report = installed(OsStr::new("/nonexistent-dir")).unwrap();
        assert!(report.iter().all(|p| p.version.is_none()));
    }
}
