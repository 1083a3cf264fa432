//! Job execution.
//!
//! A run moves through `Pending -> Syncing -> Pulling -> Executing ->
//! Collecting` and ends `Succeeded` or `Failed`. Resolution errors are
//! returned before anything is written. Once the pending record exists,
//! every outcome is written to it.

use serde::Serialize;

use crate::artifacts::{self, Artifacts};
use crate::context::Context;
use crate::error::{Error, ExecutionFailedDetails, Result};
use crate::git;
use crate::job::{self, ScheduledJob};
use crate::lock::{self, LockScope};
use crate::profile::{self, Profile};
use crate::repository::Repository;
use crate::store::ledger::{PendingRun, RunFailure, RunOutcome, RunRecord};
use crate::utils::command::ProcessSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Syncing,
    Pulling,
    Executing,
    Collecting,
    Succeeded,
    Failed,
}

/// What a run has produced so far. Survives into the failure record.
#[derive(Debug)]
struct Progress {
    state: RunState,
    profile_sha256: Option<String>,
    exit_code: Option<i32>,
    stdout: Option<String>,
}

impl Progress {
    fn enter(&mut self, state: RunState, job_id: i64) {
        self.state = state;
        tracing::info!(job_id, state = ?state, "run state");
    }
}

struct Resolved {
    job: ScheduledJob,
    repository: Repository,
    profile: Profile,
    command: String,
    argv: Vec<String>,
}

fn resolve(ctx: &Context, job_id: i64) -> Result<Resolved> {
    let job = ctx.store.get_job(job_id)?;
    let profile_id = job
        .profile_id
        .ok_or_else(|| Error::job_profile_missing(job_id))?;
    let repository_id = job.repository_id.ok_or_else(|| {
        Error::validation_invalid_argument(
            "repository",
            "No repository attached to this job",
            Some(job_id.to_string()),
            None,
        )
    })?;

    let repository = ctx.store.get_repository(repository_id)?;
    let profile = ctx.store.get_profile(profile_id)?;
    let command = job.command()?;
    let argv = job::validate_command(&command)?;

    Ok(Resolved {
        job,
        repository,
        profile,
        command,
        argv,
    })
}

/// Run a job now and return its finalized record.
pub fn run(ctx: &Context, job_id: i64) -> Result<RunRecord> {
    let resolved = resolve(ctx, job_id)?;
    // Held until the record is final; recovery treats a held lock as a live run.
    let _repository_lock = lock::acquire_logged(
        &ctx.paths.locks(),
        LockScope::Repository(resolved.repository.id),
    )?;

    let pending = ctx.store.insert_pending(&PendingRun {
        command: Some(resolved.command.clone()),
        repository_id: Some(resolved.repository.id),
        repository_used_name: Some(resolved.repository.display_name().to_string()),
        profile_yml_used_name: Some(resolved.profile.name.to_string()),
        periodic_task_name: Some(resolved.job.name.clone()),
    })?;
    tracing::info!(job_id, run_id = pending.id, run_uuid = %pending.run_uuid, "run started");

    let mut progress = Progress {
        state: RunState::Pending,
        profile_sha256: None,
        exit_code: None,
        stdout: None,
    };

    let outcome = execute(ctx, &resolved, &mut progress).and_then(|outcome| {
        let snapshot = artifacts::arg_snapshot(&outcome.artifacts.run_results);
        ctx.store.insert_arg_snapshot(pending.id, &snapshot)?;
        Ok(outcome)
    });

    match outcome {
        Ok(outcome) => {
            let record = ctx.store.finalize_success(pending.id, &outcome)?;
            progress.enter(RunState::Succeeded, job_id);
            Ok(record)
        }
        Err(e) => {
            tracing::warn!(job_id, state = ?progress.state, error = %e, "run failed");
            let record = ctx.store.finalize_failure(
                pending.id,
                &RunFailure {
                    fail_reason: e.message,
                    exit_code: progress.exit_code,
                    dbt_stdout: progress.stdout.take(),
                    profile_sha256: progress.profile_sha256.take(),
                },
            )?;
            progress.enter(RunState::Failed, job_id);
            Ok(record)
        }
    }
}

fn execute(ctx: &Context, resolved: &Resolved, progress: &mut Progress) -> Result<RunOutcome> {
    let job_id = resolved.job.id;
    let paths = &ctx.paths;

    progress.enter(RunState::Syncing, job_id);
    let mirror_lock = lock::acquire_logged(&paths.locks(), LockScope::ProfileMirror)?;
    progress.profile_sha256 = Some(profile::mirror(paths, &resolved.profile.yaml)?);

    progress.enter(RunState::Pulling, job_id);
    let pulled = git::pull(paths, &resolved.repository);
    log_pull(ctx, &pulled);

    progress.enter(RunState::Executing, job_id);
    let working_copy = paths.working_copy(resolved.repository.id);
    let program = &resolved.argv[0];
    let run = ProcessSpec::new(program)
        .args(resolved.argv[1..].iter().cloned())
        .current_dir(&working_copy)
        .env("PATH", paths.child_path())
        .merge_stderr()
        .run()
        .map_err(|e| {
            Error::execution_failed(ExecutionFailedDetails {
                command: resolved.command.clone(),
                working_dir: Some(working_copy.to_string_lossy().to_string()),
                error: format!("Failed to start {}: {}", program, e),
            })
        })?;
    drop(mirror_lock);
    progress.exit_code = run.exit_code;
    progress.stdout = Some(run.stdout.clone());
    tracing::info!(job_id, exit_code = ?run.exit_code, "dbt finished");

    let second_pull = git::pull(paths, &resolved.repository);
    tracing::debug!(job_id, success = second_pull.success, "follow-up pull");

    if ctx.settings.fail_on_nonzero_exit && !run.success {
        return Err(Error::execution_failed(ExecutionFailedDetails {
            command: resolved.command.clone(),
            working_dir: Some(working_copy.to_string_lossy().to_string()),
            error: match run.exit_code {
                Some(code) => format!("dbt exited with code {}", code),
                None => "dbt was terminated by a signal".to_string(),
            },
        }));
    }

    progress.enter(RunState::Collecting, job_id);
    let collected: Artifacts = artifacts::collect(&paths.artifacts_dir(resolved.repository.id));
    if !collected.missing.is_empty() {
        tracing::info!(job_id, missing = ?collected.missing, "artifacts missing");
    }

    Ok(RunOutcome {
        artifacts: collected,
        exit_code: run.exit_code,
        dbt_stdout: run.stdout,
        profile_sha256: progress.profile_sha256.clone(),
    })
}

fn log_pull(ctx: &Context, pulled: &crate::utils::command::CapturedRun) {
    let details = serde_json::to_string(pulled).unwrap_or_else(|_| pulled.display_command());
    if let Err(e) = ctx.store.log_subprocess(&details) {
        tracing::warn!(error = %e, "failed to record pull result");
    }
}

/// Fail pending runs that no process is executing. A run is live while
/// its repository lock is held, so only runs whose lock is free (or that
/// never had one) are failed. Returns how many were failed.
pub fn recover_orphans(ctx: &Context, reason: &str) -> Result<usize> {
    let mut recovered = 0;
    for run in ctx.store.orphaned_runs()? {
        let _held = match run.repository_id {
            Some(repository_id) => {
                let scope = LockScope::Repository(repository_id);
                match lock::try_acquire(&ctx.paths.locks(), scope)? {
                    Some(held) => Some(held),
                    None => {
                        tracing::info!(run_id = run.id, repository_id, "run still live");
                        continue;
                    }
                }
            }
            None => None,
        };
        recovered += ctx.store.mark_orphans_failed(&[run.id], reason)?;
    }
    if recovered > 0 {
        tracing::warn!(recovered, "pending runs marked failed");
    }
    Ok(recovered)
}

/// Scheduler entry point: decode the stored payload strictly and run the
/// job named by its `task_id`. One-off jobs are disabled afterwards.
pub fn trigger(ctx: &Context, job_id: i64) -> Result<RunRecord> {
    let job = ctx.store.get_job(job_id)?;
    job.decoded_args()?;
    let kwargs = job.decoded_kwargs()?;
    if !job.enabled {
        return Err(Error::validation_invalid_argument(
            "job",
            "Job is disabled",
            Some(job_id.to_string()),
            None,
        ));
    }

    let record = run(ctx, kwargs.task_id)?;
    if job.one_off {
        ctx.store.set_job_enabled(job_id, false)?;
        tracing::info!(job_id, "one-off job disabled");
    }
    Ok(record)
}
