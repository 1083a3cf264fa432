use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use dbtrun::artifacts::Artifacts;
use dbtrun::job::{self, JobSpec};
use dbtrun::lock::{self, LockScope};
use dbtrun::profile::{self, ProfileName};
use dbtrun::runner;
use dbtrun::store::ledger::{PendingRun, RunOutcome};
use dbtrun::settings::Settings;
use dbtrun::{Context, ErrorCode, RunStatus};
use tempfile::TempDir;

const PROFILE_YAML: &str = "analytics:\n  target: dev\n  outputs:\n    dev:\n      type: duckdb\n";

struct Fixture {
    dir: TempDir,
    ctx: Context,
}

impl Fixture {
    fn new() -> Self {
        Self::with_settings(|_| {})
    }

    fn with_settings(adjust: impl FnOnce(&mut Settings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let mut settings = Settings {
            home: Some(format!("{}/home", root)),
            project_path: format!("{}/projects", root),
            data_dir: format!("{}/data", root),
            ..Default::default()
        };
        adjust(&mut settings);
        let ctx = Context::open(settings).unwrap();
        Self { dir, ctx }
    }

    /// Write an executable stand-in for dbt and return its absolute path.
    fn fake_dbt(&self, body: &str) -> PathBuf {
        let bin = self.dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let path = bin.join("dbt");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Register a repository row with an existing (non-git) working copy.
    fn repository(&self) -> i64 {
        let repo = self
            .ctx
            .store
            .insert_repository(
                Some("analytics"),
                "https://ghp_token@github.com/acme/analytics.git",
                None,
            )
            .unwrap();
        fs::create_dir_all(self.ctx.paths.working_copy(repo.id)).unwrap();
        repo.id
    }

    fn profile(&self) -> i64 {
        profile::save(&self.ctx.store, &self.ctx.paths, ProfileName::Dev, PROFILE_YAML)
            .unwrap()
            .profile
            .id
    }

    fn job(
        &self,
        name: &str,
        dbt: &Path,
        repository_id: Option<i64>,
        profile_id: Option<i64>,
    ) -> i64 {
        job::create(
            &self.ctx.store,
            JobSpec {
                name: name.to_string(),
                repository_id,
                profile_id,
                args: vec![format!("{} run", dbt.display())],
                ..Default::default()
            },
        )
        .unwrap()
        .id
    }
}

fn in_working_copy(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == "projects")
}

#[test]
fn job_without_profile_fails_before_recording() {
    let fx = Fixture::new();
    let dbt = fx.fake_dbt("exit 0");
    let repository_id = fx.repository();
    let job_id = fx.job("nightly", &dbt, Some(repository_id), None);

    let err = runner::run(&fx.ctx, job_id).unwrap_err();

    assert_eq!(err.code, ErrorCode::JobProfileMissing);
    assert!(fx.ctx.store.list_runs(10).unwrap().is_empty());
}

#[test]
fn manifest_only_run_records_missing_artifacts() {
    let fx = Fixture::new();
    let dbt =
        fx.fake_dbt("mkdir -p target\necho '{\"a\":1}' > target/manifest.json\necho compiled");
    let job_id = fx.job("nightly", &dbt, Some(fx.repository()), Some(fx.profile()));

    let record = runner::run(&fx.ctx, job_id).unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert!(record.success);
    assert_eq!(record.manifest, Some(serde_json::json!({"a": 1})));
    assert_eq!(record.run_results, Some(serde_json::json!({})));
    assert_eq!(
        record.missing_artifacts,
        vec!["run_results", "sources", "catalog"]
    );
    assert_eq!(record.exit_code, Some(0));
    assert!(record.dbt_stdout.unwrap_or_default().contains("compiled"));
    assert_eq!(record.repository_used_name.as_deref(), Some("analytics"));
    assert_eq!(record.profile_yml_used_name.as_deref(), Some("DEV"));
    assert_eq!(record.periodic_task_name.as_deref(), Some("nightly"));
    assert!(record.profile_sha256.is_some());
    assert!(fx.ctx.paths.profile_mirror().exists());
}

#[test]
fn nonzero_exit_is_recorded_without_failing_the_run() {
    let fx = Fixture::new();
    let dbt = fx.fake_dbt("echo boom\nexit 3");
    let job_id = fx.job("nightly", &dbt, Some(fx.repository()), Some(fx.profile()));

    let record = runner::run(&fx.ctx, job_id).unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.exit_code, Some(3));
    assert_eq!(record.missing_artifacts.len(), 4);
}

#[test]
fn nonzero_exit_fails_the_run_when_configured() {
    let fx = Fixture::with_settings(|s| s.fail_on_nonzero_exit = true);
    let dbt = fx.fake_dbt("echo boom\nexit 3");
    let job_id = fx.job("nightly", &dbt, Some(fx.repository()), Some(fx.profile()));

    let record = runner::run(&fx.ctx, job_id).unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert!(!record.success);
    assert_eq!(record.exit_code, Some(3));
    assert!(record.manifest.is_none());
    assert!(record.dbt_stdout.unwrap_or_default().contains("boom"));
    assert!(record.fail_reason.unwrap_or_default().contains("exited with code 3"));
}

#[test]
fn previous_command_follows_run_order() {
    let fx = Fixture::new();
    let dbt = fx.fake_dbt("exit 0");
    let repository_id = fx.repository();
    let profile_id = fx.profile();
    let first = fx.job("first", &dbt, Some(repository_id), Some(profile_id));
    let second = fx.job("second", &dbt, Some(repository_id), Some(profile_id));

    let a = runner::run(&fx.ctx, first).unwrap();
    let b = runner::run(&fx.ctx, second).unwrap();

    assert_eq!(
        a.previous_command.as_deref(),
        Some(dbtrun::store::ledger::FIRST_COMMAND_SENTINEL)
    );
    assert_eq!(b.previous_command, a.command);
}

#[test]
fn run_executes_inside_the_working_copy() {
    let fx = Fixture::new();
    let dbt = fx.fake_dbt("pwd");
    let job_id = fx.job("nightly", &dbt, Some(fx.repository()), Some(fx.profile()));

    let record = runner::run(&fx.ctx, job_id).unwrap();
    let stdout = record.dbt_stdout.unwrap_or_default();

    assert!(in_working_copy(Path::new(stdout.trim())));
}

#[test]
fn unstartable_program_finalizes_a_failed_record() {
    let fx = Fixture::new();
    let missing = fx.dir.path().join("bin").join("dbt-missing");
    let job_id = fx.job("nightly", &missing, Some(fx.repository()), Some(fx.profile()));

    let record = runner::run(&fx.ctx, job_id).unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.exit_code.is_none());
    assert!(fx.ctx.store.orphaned_runs().unwrap().is_empty());
}

#[test]
fn trigger_rejects_tampered_kwargs() {
    let fx = Fixture::new();
    let dbt = fx.fake_dbt("exit 0");
    let job_id = fx.job("nightly", &dbt, Some(fx.repository()), Some(fx.profile()));
    rusqlite::Connection::open(fx.ctx.paths.database())
        .unwrap()
        .execute(
            "UPDATE jobs SET kwargs = '{\"task_id\": 1, \"extra\": true}' WHERE id = ?1",
            [job_id],
        )
        .unwrap();

    let err = runner::trigger(&fx.ctx, job_id).unwrap_err();

    assert_eq!(err.code, ErrorCode::ValidationInvalidJson);
    assert!(fx.ctx.store.list_runs(10).unwrap().is_empty());
}

#[test]
fn trigger_disables_one_off_jobs() {
    let fx = Fixture::new();
    let dbt = fx.fake_dbt("exit 0");
    let job = job::create(
        &fx.ctx.store,
        JobSpec {
            name: "backfill".to_string(),
            one_off: true,
            repository_id: Some(fx.repository()),
            profile_id: Some(fx.profile()),
            args: vec![format!("{} run --full-refresh", dbt.display())],
            ..Default::default()
        },
    )
    .unwrap();

    let record = runner::trigger(&fx.ctx, job.id).unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert!(!fx.ctx.store.get_job(job.id).unwrap().enabled);

    let err = runner::trigger(&fx.ctx, job.id).unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
}

/// Start `runner::run` on a second context, as another process would.
fn run_in_background(fx: &Fixture, job_id: i64) -> thread::JoinHandle<dbtrun::Result<RunStatus>> {
    let settings = fx.ctx.settings.clone();
    thread::spawn(move || {
        let ctx = Context::open(settings)?;
        Ok(runner::run(&ctx, job_id)?.status)
    })
}

#[test]
fn run_waits_for_its_repository() {
    let fx = Fixture::new();
    let dbt = fx.fake_dbt("exit 0");
    let repository_id = fx.repository();
    let job_id = fx.job("nightly", &dbt, Some(repository_id), Some(fx.profile()));

    let held = lock::acquire(&fx.ctx.paths.locks(), LockScope::Repository(repository_id)).unwrap();
    let handle = run_in_background(&fx, job_id);
    thread::sleep(Duration::from_millis(300));
    assert!(fx.ctx.store.list_runs(10).unwrap().is_empty());

    drop(held);
    assert_eq!(handle.join().unwrap().unwrap(), RunStatus::Succeeded);
}

#[test]
fn run_waits_for_the_profile_mirror() {
    let fx = Fixture::new();
    let dbt = fx.fake_dbt("exit 0");
    let job_id = fx.job("nightly", &dbt, Some(fx.repository()), Some(fx.profile()));

    let held = lock::acquire(&fx.ctx.paths.locks(), LockScope::ProfileMirror).unwrap();
    let handle = run_in_background(&fx, job_id);
    thread::sleep(Duration::from_millis(300));
    let runs = fx.ctx.store.list_runs(10).unwrap();
    assert!(runs.iter().all(|r| r.status == RunStatus::Pending));

    drop(held);
    assert_eq!(handle.join().unwrap().unwrap(), RunStatus::Succeeded);
}

#[test]
fn recovery_skips_runs_that_are_still_live() {
    let fx = Fixture::new();
    let live_repository = fx.repository();
    let store = &fx.ctx.store;

    let locks = fx.ctx.paths.locks();
    let held = lock::acquire(&locks, LockScope::Repository(live_repository)).unwrap();
    let live = store
        .insert_pending(&PendingRun {
            command: Some("dbt run".to_string()),
            repository_id: Some(live_repository),
            ..Default::default()
        })
        .unwrap();
    let dead = store
        .insert_pending(&PendingRun {
            command: Some("dbt seed".to_string()),
            repository_id: Some(live_repository + 1),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(runner::recover_orphans(&fx.ctx, "interrupted").unwrap(), 1);
    assert_eq!(store.get_run(dead.id).unwrap().status, RunStatus::Failed);
    assert_eq!(store.get_run(live.id).unwrap().status, RunStatus::Pending);

    let finished = store
        .finalize_success(
            live.id,
            &RunOutcome {
                artifacts: Artifacts::default(),
                exit_code: Some(0),
                dbt_stdout: String::new(),
                profile_sha256: None,
            },
        )
        .unwrap();
    assert_eq!(finished.status, RunStatus::Succeeded);
    drop(held);
}
