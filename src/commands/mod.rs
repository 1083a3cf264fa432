use std::io::Read;
use std::path::{Path, PathBuf};

use dbtrun::settings::Settings;
use dbtrun::Context;

pub type CmdResult<T> = dbtrun::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    /// Settings file override (`--config`). `DBTRUN_CONFIG` applies otherwise.
    pub config: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn settings(&self) -> dbtrun::Result<Settings> {
        match &self.config {
            Some(path) => Settings::load_from(path),
            None => Settings::load(),
        }
    }

    pub fn context(&self) -> dbtrun::Result<Context> {
        Context::open(self.settings()?)
    }
}

/// Read text from a literal, a file (`@path`) or stdin (`-`).
pub fn read_text_source(spec: &str, field: &str) -> dbtrun::Result<String> {
    if spec.trim() == "-" {
        let mut buf = String::new();
        if crate::tty::is_stdin_tty() {
            return Err(dbtrun::Error::validation_invalid_argument(
                field,
                "Cannot read from stdin when stdin is a TTY",
                None,
                None,
            ));
        }
        std::io::stdin().read_to_string(&mut buf).map_err(|e| {
            dbtrun::Error::internal_io(e.to_string(), Some("read stdin".to_string()))
        })?;
        return Ok(buf);
    }

    if let Some(path) = spec.strip_prefix('@') {
        if path.trim().is_empty() {
            return Err(dbtrun::Error::validation_invalid_argument(
                field,
                "Invalid source '@' (missing file path)",
                None,
                None,
            ));
        }
        return dbtrun::utils::io::read_file(Path::new(path), &format!("read {}", path));
    }

    Ok(spec.to_string())
}

pub mod credential;
pub mod job;
pub mod profile;
pub mod repo;
pub mod run;
pub mod runs;
pub mod versions;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (dbtrun::Result<serde_json::Value>, i32) {
    crate::tty::status("dbtrun is working...");

    match command {
        crate::Commands::Credential(args) => dispatch!(args, global, credential),
        crate::Commands::Repo(args) => dispatch!(args, global, repo),
        crate::Commands::Profile(args) => dispatch!(args, global, profile),
        crate::Commands::Job(args) => dispatch!(args, global, job),
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Runs(args) => dispatch!(args, global, runs),
        crate::Commands::Versions(args) => dispatch!(args, global, versions),
    }
}
