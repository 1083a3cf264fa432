use clap::Args;
use serde::Serialize;

use dbtrun::runner;
use dbtrun::{RunRecord, RunStatus};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct RunArgs {
    /// Job ID
    pub job_id: i64,
}

#[derive(Serialize)]
pub struct RunOutput {
    command: &'static str,
    run: RunRecord,
}

/// Run a job immediately. A failed run is still a recorded run, so the
/// envelope carries the record and the exit code reports the failure.
pub fn run(args: RunArgs, global: &GlobalArgs) -> CmdResult<RunOutput> {
    let ctx = global.context()?;
    let record = runner::run(&ctx, args.job_id)?;
    let exit_code = match record.status {
        RunStatus::Failed => 20,
        _ => 0,
    };

    Ok((
        RunOutput {
            command: "run",
            run: record,
        },
        exit_code,
    ))
}
