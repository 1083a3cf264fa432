use std::path::Path;
use std::process::Command;

use serde_json::Value;

fn write_settings(root: &Path) -> std::path::PathBuf {
    let config = root.join("dbtrun.json");
    let settings = serde_json::json!({
        "home": root.join("home"),
        "project_path": root.join("projects"),
        "data_dir": root.join("data"),
    });
    std::fs::write(&config, settings.to_string()).unwrap();
    config
}

fn dbtrun(config: &Path, args: &[&str]) -> (Value, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_dbtrun"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .unwrap();
    let envelope: Value = serde_json::from_slice(&output.stdout).unwrap();
    (envelope, output.status.code().unwrap_or(-1))
}

#[test]
fn missing_job_maps_to_not_found_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_settings(dir.path());

    let (envelope, code) = dbtrun(&config, &["job", "show", "42"]);

    assert_eq!(code, 4);
    assert_eq!(envelope["success"], false);
    assert_eq!(envelope["error"]["code"], "job.not_found");
}

#[test]
fn profile_set_then_list() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_settings(dir.path());

    let (saved, code) = dbtrun(&config, &["profile", "set", "dev", "analytics:\n  target: dev\n"]);
    assert_eq!(code, 0);
    assert_eq!(saved["data"]["command"], "profile.set");
    assert_eq!(saved["data"]["profile"]["name"], "DEV");
    assert!(dir.path().join("home/.dbt/profiles.yml").exists());

    let (listed, _) = dbtrun(&config, &["profile", "list"]);
    assert_eq!(listed["data"]["profiles"].as_array().unwrap().len(), 1);
}

#[test]
fn invalid_repository_url_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_settings(dir.path());

    let (envelope, code) = dbtrun(
        &config,
        &["repo", "create", "https://github.com/acme/analytics.git"],
    );

    assert_eq!(code, 2);
    assert_eq!(envelope["error"]["code"], "repository.url_invalid");
}

#[test]
fn job_create_stores_command_and_kwargs() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_settings(dir.path());

    let (created, code) = dbtrun(
        &config,
        &[
            "job",
            "create",
            "nightly",
            "--command",
            "dbt run --select staging",
            "--cron",
            "0 3 * * *",
        ],
    );

    assert_eq!(code, 0);
    let job = &created["data"]["job"];
    let args: Vec<String> = serde_json::from_str(job["args"].as_str().unwrap()).unwrap();
    assert_eq!(args, vec!["dbt run --select staging"]);
    let kwargs: Value = serde_json::from_str(job["kwargs"].as_str().unwrap()).unwrap();
    assert_eq!(kwargs["task_id"], job["id"]);
    assert_eq!(job["trigger"]["type"], "crontab");
}

#[test]
fn import_records_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_settings(dir.path());
    let target = dir.path().join("target");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join("manifest.json"), r#"{"nodes": {}}"#).unwrap();

    let (imported, code) = dbtrun(&config, &["runs", "import", target.to_str().unwrap()]);

    assert_eq!(code, 0);
    assert_eq!(imported["data"]["run"]["status"], "succeeded");

    let (listed, _) = dbtrun(&config, &["runs", "list"]);
    assert_eq!(listed["data"]["runs"].as_array().unwrap().len(), 1);
}
