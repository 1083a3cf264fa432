use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use dbtrun::store::ledger::{StoredArgSnapshot, SubprocessLog};
use dbtrun::{runner, RunRecord};

use super::{CmdResult, GlobalArgs};

const ORPHAN_REASON: &str = "Run was interrupted before it finished";

#[derive(Default, Serialize)]
pub struct RunsOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<RunRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    runs: Option<Vec<RunRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arg_snapshot: Option<StoredArgSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logs: Option<Vec<SubprocessLog>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recovered: Option<usize>,
}

#[derive(Args)]
pub struct RunsArgs {
    #[command(subcommand)]
    command: RunsCommand,
}

#[derive(Subcommand)]
enum RunsCommand {
    /// List recorded runs, newest first
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Display a run with its argument snapshot
    Show {
        /// Run record ID
        run_id: i64,
    },
    /// List runs still pending
    Orphans,
    /// Mark every pending run as failed
    Recover,
    /// Show recorded git pull results
    Logs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Record artifacts from an existing dbt target directory
    Import {
        /// Directory holding manifest.json and friends
        dir: PathBuf,
    },
}

pub fn run(args: RunsArgs, global: &GlobalArgs) -> CmdResult<RunsOutput> {
    let ctx = global.context()?;

    match args.command {
        RunsCommand::List { limit } => Ok((
            RunsOutput {
                command: "runs.list".to_string(),
                runs: Some(ctx.store.list_runs(limit)?),
                ..Default::default()
            },
            0,
        )),
        RunsCommand::Show { run_id } => {
            let record = ctx.store.get_run(run_id)?;
            let snapshot = ctx.store.arg_snapshot_for(run_id)?;
            Ok((
                RunsOutput {
                    command: "runs.show".to_string(),
                    run: Some(record),
                    arg_snapshot: snapshot,
                    ..Default::default()
                },
                0,
            ))
        }
        RunsCommand::Orphans => Ok((
            RunsOutput {
                command: "runs.orphans".to_string(),
                runs: Some(ctx.store.orphaned_runs()?),
                ..Default::default()
            },
            0,
        )),
        RunsCommand::Recover => {
            let recovered = runner::recover_orphans(&ctx, ORPHAN_REASON)?;
            Ok((
                RunsOutput {
                    command: "runs.recover".to_string(),
                    recovered: Some(recovered),
                    ..Default::default()
                },
                0,
            ))
        }
        RunsCommand::Logs { limit } => Ok((
            RunsOutput {
                command: "runs.logs".to_string(),
                logs: Some(ctx.store.list_subprocess_logs(limit)?),
                ..Default::default()
            },
            0,
        )),
        RunsCommand::Import { dir } => Ok((
            RunsOutput {
                command: "runs.import".to_string(),
                run: Some(ctx.store.import_artifacts(&dir)?),
                ..Default::default()
            },
            0,
        )),
    }
}
