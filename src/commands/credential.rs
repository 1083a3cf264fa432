use clap::{Args, Subcommand};
use serde::Serialize;

use dbtrun::credential::{self, CredentialView};

use super::{CmdResult, GlobalArgs};

#[derive(Default, Serialize)]
pub struct CredentialOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential: Option<CredentialView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credentials: Option<Vec<CredentialView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<i64>,
}

#[derive(Args)]
pub struct CredentialArgs {
    #[command(subcommand)]
    command: CredentialCommand,
}

#[derive(Subcommand)]
enum CredentialCommand {
    /// Create a credential and generate its SSH key pair
    Create {
        /// Label for the credential
        name: String,
    },
    /// Display a credential and its public key
    Show {
        /// Credential ID
        credential_id: i64,
    },
    /// Print the public key to add as a deploy key
    PublicKey {
        /// Credential ID
        credential_id: i64,
    },
    /// List all credentials
    List,
    /// Delete a credential and its key files
    Delete {
        /// Credential ID
        credential_id: i64,
        /// Tolerate key files that are already gone
        #[arg(long)]
        force: bool,
    },
}

pub fn run(args: CredentialArgs, global: &GlobalArgs) -> CmdResult<CredentialOutput> {
    let ctx = global.context()?;

    match args.command {
        CredentialCommand::Create { name } => {
            let created = credential::create(&ctx.store, &ctx.paths, &name)?;
            Ok((
                CredentialOutput {
                    command: "credential.create".to_string(),
                    credential: Some(created),
                    ..Default::default()
                },
                0,
            ))
        }
        CredentialCommand::Show { credential_id } => Ok((
            CredentialOutput {
                command: "credential.show".to_string(),
                credential: Some(credential::show(&ctx.store, &ctx.paths, credential_id)?),
                ..Default::default()
            },
            0,
        )),
        CredentialCommand::PublicKey { credential_id } => {
            ctx.store.get_credential(credential_id)?;
            Ok((
                CredentialOutput {
                    command: "credential.public_key".to_string(),
                    public_key: Some(credential::public_key(&ctx.paths, credential_id)?),
                    ..Default::default()
                },
                0,
            ))
        }
        CredentialCommand::List => Ok((
            CredentialOutput {
                command: "credential.list".to_string(),
                credentials: Some(credential::list(&ctx.store, &ctx.paths)?),
                ..Default::default()
            },
            0,
        )),
        CredentialCommand::Delete {
            credential_id,
            force,
        } => {
            credential::remove(&ctx.store, &ctx.paths, credential_id, force)?;
            Ok((
                CredentialOutput {
                    command: "credential.delete".to_string(),
                    deleted: Some(credential_id),
                    ..Default::default()
                },
                0,
            ))
        }
    }
}
