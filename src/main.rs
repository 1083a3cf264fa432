use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{credential, job, profile, repo, run, runs, versions};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "dbtrun")]
#[command(version = VERSION)]
#[command(about = "Run scheduled dbt jobs against git-hosted projects")]
struct Cli {
    /// Settings file (defaults to $DBTRUN_CONFIG or ~/.config/dbtrun/dbtrun.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage SSH deploy keys
    #[command(visible_alias = "credentials")]
    Credential(credential::CredentialArgs),
    /// Manage dbt project repositories
    #[command(visible_alias = "repos")]
    Repo(repo::RepoArgs),
    /// Manage profiles.yml variants
    #[command(visible_alias = "profiles")]
    Profile(profile::ProfileArgs),
    /// Manage scheduled jobs
    #[command(visible_alias = "jobs")]
    Job(job::JobArgs),
    /// Run a job now
    Run(run::RunArgs),
    /// Inspect the run ledger
    Runs(runs::RunsArgs),
    /// Show installed dbt package versions
    Versions(versions::VersionsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DBTRUN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let global = GlobalArgs { config: cli.config };
    let (json_result, exit_code) = commands::run_json(cli.command, &global);

    if let Err(e) = output::print_json_result(json_result) {
        tracing::error!(error = %e, "failed to write response");
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
