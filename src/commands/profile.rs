use clap::{Args, Subcommand};
use serde::Serialize;

use dbtrun::profile::{self, Profile, ProfileName, SavedProfile};

use super::{read_text_source, CmdResult, GlobalArgs};

#[derive(Default, Serialize)]
pub struct ProfileOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<SavedProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stored: Option<Profile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    profiles: Option<Vec<Profile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<i64>,
}

#[derive(Args)]
pub struct ProfileArgs {
    #[command(subcommand)]
    command: ProfileCommand,
}

#[derive(Subcommand)]
enum ProfileCommand {
    /// Create or replace a profile and write it to profiles.yml
    Set {
        /// Profile name: DEV or PROD
        name: String,
        /// YAML text, @file, or - for stdin
        yaml: String,
    },
    /// Display a stored profile
    Show {
        /// Profile ID
        profile_id: i64,
    },
    /// Write a stored profile to profiles.yml
    Activate {
        /// Profile ID
        profile_id: i64,
    },
    /// List stored profiles
    List,
    /// Delete a profile
    Delete {
        /// Profile ID
        profile_id: i64,
    },
}

pub fn run(args: ProfileArgs, global: &GlobalArgs) -> CmdResult<ProfileOutput> {
    let ctx = global.context()?;

    match args.command {
        ProfileCommand::Set { name, yaml } => {
            let name: ProfileName = name.parse()?;
            let yaml = read_text_source(&yaml, "yaml")?;
            let saved = profile::save(&ctx.store, &ctx.paths, name, &yaml)?;
            Ok((
                ProfileOutput {
                    command: "profile.set".to_string(),
                    profile: Some(saved),
                    ..Default::default()
                },
                0,
            ))
        }
        ProfileCommand::Show { profile_id } => Ok((
            ProfileOutput {
                command: "profile.show".to_string(),
                stored: Some(ctx.store.get_profile(profile_id)?),
                ..Default::default()
            },
            0,
        )),
        ProfileCommand::Activate { profile_id } => {
            let saved = profile::activate(&ctx.store, &ctx.paths, profile_id)?;
            Ok((
                ProfileOutput {
                    command: "profile.activate".to_string(),
                    profile: Some(saved),
                    ..Default::default()
                },
                0,
            ))
        }
        ProfileCommand::List => Ok((
            ProfileOutput {
                command: "profile.list".to_string(),
                profiles: Some(ctx.store.list_profiles()?),
                ..Default::default()
            },
            0,
        )),
        ProfileCommand::Delete { profile_id } => {
            profile::remove(&ctx.store, profile_id)?;
            Ok((
                ProfileOutput {
                    command: "profile.delete".to_string(),
                    deleted: Some(profile_id),
                    ..Default::default()
                },
                0,
            ))
        }
    }
}
