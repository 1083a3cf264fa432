use clap::{Args, Subcommand};
use serde::Serialize;

use dbtrun::git::SyncResult;
use dbtrun::repository::{self, RegisteredRepository, Repository, RepositoryUpdate};

use super::{CmdResult, GlobalArgs};

#[derive(Default, Serialize)]
pub struct RepoOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    repository: Option<RegisteredRepository>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repositories: Option<Vec<Repository>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sync: Option<SyncResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    removed_working_copy: Option<bool>,
}

#[derive(Args)]
pub struct RepoArgs {
    #[command(subcommand)]
    command: RepoCommand,
}

#[derive(Subcommand)]
enum RepoCommand {
    /// Register a repository and clone it
    Create {
        /// Clone URL (git@... needs --credential, https needs an embedded token)
        url: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// Credential ID holding the deploy key
        #[arg(long)]
        credential: Option<i64>,
    },
    /// Re-point a repository and clone it again
    Set {
        /// Repository ID
        repository_id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        /// Credential ID to attach
        #[arg(long, conflicts_with = "no_credential")]
        credential: Option<i64>,
        /// Detach the credential
        #[arg(long)]
        no_credential: bool,
    },
    /// Remove the working copy and clone again
    Sync {
        /// Repository ID
        repository_id: i64,
    },
    /// Display a repository
    Show {
        /// Repository ID
        repository_id: i64,
    },
    /// List all repositories
    List,
    /// Delete a repository and its working copy
    Delete {
        /// Repository ID
        repository_id: i64,
    },
}

pub fn run(args: RepoArgs, global: &GlobalArgs) -> CmdResult<RepoOutput> {
    let ctx = global.context()?;

    match args.command {
        RepoCommand::Create {
            url,
            name,
            credential,
        } => {
            let registered =
                repository::register(&ctx.store, &ctx.paths, name.as_deref(), &url, credential)?;
            Ok((
                RepoOutput {
                    command: "repo.create".to_string(),
                    repository: Some(registered),
                    ..Default::default()
                },
                0,
            ))
        }
        RepoCommand::Set {
            repository_id,
            name,
            url,
            credential,
            no_credential,
        } => {
            let credential_id = if no_credential {
                Some(None)
            } else {
                credential.map(Some)
            };
            let updated = repository::update(
                &ctx.store,
                &ctx.paths,
                repository_id,
                RepositoryUpdate {
                    name,
                    url,
                    credential_id,
                },
            )?;
            Ok((
                RepoOutput {
                    command: "repo.set".to_string(),
                    repository: Some(updated),
                    ..Default::default()
                },
                0,
            ))
        }
        RepoCommand::Sync { repository_id } => {
            let result = repository::sync(&ctx.store, &ctx.paths, repository_id)?;
            let exit_code = if result.ok { 0 } else { 20 };
            Ok((
                RepoOutput {
                    command: "repo.sync".to_string(),
                    sync: Some(result),
                    ..Default::default()
                },
                exit_code,
            ))
        }
        RepoCommand::Show { repository_id } => {
            let repository = ctx.store.get_repository(repository_id)?;
            Ok((
                RepoOutput {
                    command: "repo.show".to_string(),
                    repository: Some(RegisteredRepository {
                        working_copy: ctx
                            .paths
                            .working_copy(repository_id)
                            .to_string_lossy()
                            .to_string(),
                        repository,
                    }),
                    ..Default::default()
                },
                0,
            ))
        }
        RepoCommand::List => Ok((
            RepoOutput {
                command: "repo.list".to_string(),
                repositories: Some(ctx.store.list_repositories()?),
                ..Default::default()
            },
            0,
        )),
        RepoCommand::Delete { repository_id } => {
            let removed = repository::remove(&ctx.store, &ctx.paths, repository_id)?;
            Ok((
                RepoOutput {
                    command: "repo.delete".to_string(),
                    deleted: Some(repository_id),
                    removed_working_copy: Some(removed),
                    ..Default::default()
                },
                0,
            ))
        }
    }
}
