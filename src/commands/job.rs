use clap::{Args, Subcommand};
use serde::Serialize;

use dbtrun::job::{self, IntervalPeriod, JobSpec, JobUpdate, ScheduledJob, Trigger};
use dbtrun::runner;
use dbtrun::RunRecord;

use super::{CmdResult, GlobalArgs};

#[derive(Default, Serialize)]
pub struct JobOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<ScheduledJob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jobs: Option<Vec<ScheduledJob>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<RunRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<i64>,
}

#[derive(Args)]
pub struct JobArgs {
    #[command(subcommand)]
    command: JobCommand,
}

/// Schedule flags shared by create and set.
#[derive(Args, Default)]
struct ScheduleArgs {
    /// Interval count (with --period)
    #[arg(long, conflicts_with = "cron")]
    every: Option<u32>,
    /// Interval unit: days, hours, minutes, seconds
    #[arg(long, requires = "every")]
    period: Option<String>,
    /// Five-field cron expression: "minute hour day-of-month month day-of-week"
    #[arg(long)]
    cron: Option<String>,
    /// Timezone for --cron
    #[arg(long, default_value = "UTC")]
    timezone: String,
}

impl ScheduleArgs {
    fn trigger(&self) -> dbtrun::Result<Option<Trigger>> {
        if let Some(expression) = &self.cron {
            return Trigger::crontab(expression, &self.timezone).map(Some);
        }
        match self.every {
            Some(every) => {
                let period: IntervalPeriod = match &self.period {
                    Some(p) => p.parse()?,
                    None => IntervalPeriod::Days,
                };
                Trigger::interval(every, period).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[derive(Subcommand)]
enum JobCommand {
    /// Create a scheduled job
    Create {
        /// Unique job name
        name: String,
        /// dbt command line, e.g. "dbt run --select staging"
        #[arg(long = "command")]
        dbt_command: String,
        /// Extra stored argument (repeatable)
        #[arg(long = "arg")]
        extra_args: Vec<String>,
        /// Repository ID
        #[arg(long)]
        repo: Option<i64>,
        /// Profile ID
        #[arg(long)]
        profile: Option<i64>,
        #[arg(long, default_value = "")]
        description: String,
        /// Disable the job after its first triggered run
        #[arg(long)]
        one_off: bool,
        /// Create the job disabled
        #[arg(long)]
        disabled: bool,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },
    /// Change a job
    Set {
        /// Job ID
        job_id: i64,
        #[arg(long)]
        name: Option<String>,
        /// Replace the dbt command line
        #[arg(long = "command")]
        dbt_command: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, conflicts_with = "no_repo")]
        repo: Option<i64>,
        /// Detach the repository
        #[arg(long)]
        no_repo: bool,
        #[arg(long, conflicts_with = "no_profile")]
        profile: Option<i64>,
        /// Detach the profile
        #[arg(long)]
        no_profile: bool,
        /// Mark as one-off (true/false)
        #[arg(long)]
        one_off: Option<bool>,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },
    /// Enable a job
    Enable {
        /// Job ID
        job_id: i64,
    },
    /// Disable a job
    Disable {
        /// Job ID
        job_id: i64,
    },
    /// Display a job
    Show {
        /// Job ID
        job_id: i64,
    },
    /// List all jobs
    List,
    /// Delete a job
    Delete {
        /// Job ID
        job_id: i64,
    },
    /// Fire a job the way the scheduler does
    Trigger {
        /// Job ID
        job_id: i64,
    },
}

fn clearable(value: Option<i64>, clear: bool) -> Option<Option<i64>> {
    if clear {
        Some(None)
    } else {
        value.map(Some)
    }
}

pub fn run(args: JobArgs, global: &GlobalArgs) -> CmdResult<JobOutput> {
    let ctx = global.context()?;

    match args.command {
        JobCommand::Create {
            name,
            dbt_command,
            extra_args,
            repo,
            profile,
            description,
            one_off,
            disabled,
            schedule,
        } => {
            let mut stored_args = vec![dbt_command];
            stored_args.extend(extra_args);

            let created = job::create(
                &ctx.store,
                JobSpec {
                    name,
                    enabled: !disabled,
                    one_off,
                    description,
                    trigger: schedule.trigger()?.unwrap_or_default(),
                    repository_id: repo,
                    profile_id: profile,
                    args: stored_args,
                },
            )?;
            Ok((
                JobOutput {
                    command: "job.create".to_string(),
                    job: Some(created),
                    ..Default::default()
                },
                0,
            ))
        }
        JobCommand::Set {
            job_id,
            name,
            dbt_command,
            description,
            repo,
            no_repo,
            profile,
            no_profile,
            one_off,
            schedule,
        } => {
            let args = match dbt_command {
                Some(command) => {
                    let mut stored = ctx.store.get_job(job_id)?.decoded_args()?;
                    match stored.first_mut() {
                        Some(first) => *first = command,
                        None => stored.push(command),
                    }
                    Some(stored)
                }
                None => None,
            };

            let updated = job::update(
                &ctx.store,
                job_id,
                JobUpdate {
                    name,
                    one_off,
                    description,
                    trigger: schedule.trigger()?,
                    repository_id: clearable(repo, no_repo),
                    profile_id: clearable(profile, no_profile),
                    args,
                    ..Default::default()
                },
            )?;
            Ok((
                JobOutput {
                    command: "job.set".to_string(),
                    job: Some(updated),
                    ..Default::default()
                },
                0,
            ))
        }
        JobCommand::Enable { job_id } => Ok((
            JobOutput {
                command: "job.enable".to_string(),
                job: Some(job::set_enabled(&ctx.store, job_id, true)?),
                ..Default::default()
            },
            0,
        )),
        JobCommand::Disable { job_id } => Ok((
            JobOutput {
                command: "job.disable".to_string(),
                job: Some(job::set_enabled(&ctx.store, job_id, false)?),
                ..Default::default()
            },
            0,
        )),
        JobCommand::Show { job_id } => Ok((
            JobOutput {
                command: "job.show".to_string(),
                job: Some(ctx.store.get_job(job_id)?),
                ..Default::default()
            },
            0,
        )),
        JobCommand::List => Ok((
            JobOutput {
                command: "job.list".to_string(),
                jobs: Some(ctx.store.list_jobs()?),
                ..Default::default()
            },
            0,
        )),
        JobCommand::Delete { job_id } => {
            job::remove(&ctx.store, job_id)?;
            Ok((
                JobOutput {
                    command: "job.delete".to_string(),
                    deleted: Some(job_id),
                    ..Default::default()
                },
                0,
            ))
        }
        JobCommand::Trigger { job_id } => {
            let record = runner::trigger(&ctx, job_id)?;
            Ok((
                JobOutput {
                    command: "job.trigger".to_string(),
                    run: Some(record),
                    ..Default::default()
                },
                0,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_wins_over_default_interval() {
        let schedule = ScheduleArgs {
            cron: Some("0 6 * * *".to_string()),
            timezone: "Europe/Berlin".to_string(),
            ..Default::default()
        };
        match schedule.trigger().unwrap() {
            Some(Trigger::Crontab { hour, timezone, .. }) => {
                assert_eq!(hour, "6");
                assert_eq!(timezone, "Europe/Berlin");
            }
            other => panic!("unexpected trigger: {:?}", other),
        }
    }

    #[test]
    fn interval_period_defaults_to_days() {
        let schedule = ScheduleArgs {
            every: Some(3),
            ..Default::default()
        };
        assert_eq!(
            schedule.trigger().unwrap(),
            Some(Trigger::Interval {
                every: 3,
                period: IntervalPeriod::Days
            })
        );
    }

    #[test]
    fn no_schedule_flags_leave_trigger_unset() {
        assert_eq!(ScheduleArgs::default().trigger().unwrap(), None);
    }

    #[test]
    fn clearing_a_reference_wins() {
        assert_eq!(clearable(Some(4), true), Some(None));
        assert_eq!(clearable(Some(4), false), Some(Some(4)));
        assert_eq!(clearable(None, false), None);
    }
}
