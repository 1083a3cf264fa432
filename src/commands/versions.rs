use clap::Args;
use serde::Serialize;

use dbtrun::paths::Paths;
use dbtrun::versions::{self, PackageVersion};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct VersionsArgs {}

#[derive(Serialize)]
pub struct VersionsOutput {
    command: &'static str,
    cli_version: &'static str,
    packages: Vec<PackageVersion>,
}

pub fn run(_args: VersionsArgs, global: &GlobalArgs) -> CmdResult<VersionsOutput> {
    let paths = Paths::resolve(&global.settings()?)?;
    let packages = versions::installed(paths.child_path())?;

    Ok((
        VersionsOutput {
            command: "versions",
            cli_version: env!("CARGO_PKG_VERSION"),
            packages,
        },
        0,
    ))
}
