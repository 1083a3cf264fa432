//! Scheduled jobs: a dbt command bound to a repository and a profile.
//!
//! Trigger evaluation belongs to an external scheduler; the trigger is only
//! stored here. Positional and keyword payloads are kept as JSON text and
//! decoded strictly whenever a job is triggered.

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::utils::{shell, validation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalPeriod {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl IntervalPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalPeriod::Days => "days",
            IntervalPeriod::Hours => "hours",
            IntervalPeriod::Minutes => "minutes",
            IntervalPeriod::Seconds => "seconds",
        }
    }
}

impl std::str::FromStr for IntervalPeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "days" | "day" => Ok(IntervalPeriod::Days),
            "hours" | "hour" => Ok(IntervalPeriod::Hours),
            "minutes" | "minute" => Ok(IntervalPeriod::Minutes),
            "seconds" | "second" => Ok(IntervalPeriod::Seconds),
            _ => Err(Error::validation_invalid_argument(
                "period",
                format!("Unknown interval period '{}'", s),
                Some(s.to_string()),
                Some(vec![
                    "days".to_string(),
                    "hours".to_string(),
                    "minutes".to_string(),
                    "seconds".to_string(),
                ]),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trigger {
    Interval {
        every: u32,
        period: IntervalPeriod,
    },
    Crontab {
        minute: String,
        hour: String,
        day_of_week: String,
        day_of_month: String,
        month_of_year: String,
        timezone: String,
    },
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger::Interval {
            every: 1,
            period: IntervalPeriod::Days,
        }
    }
}

impl Trigger {
    pub fn interval(every: u32, period: IntervalPeriod) -> Result<Self> {
        if every == 0 {
            return Err(Error::validation_invalid_argument(
                "every",
                "Interval must be at least 1",
                Some(every.to_string()),
                None,
            ));
        }
        Ok(Trigger::Interval { every, period })
    }

    /// Parse a five-field cron expression: minute hour day-of-month month day-of-week.
    pub fn crontab(expression: &str, timezone: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let field_re = Regex::new(r"^[0-9A-Za-z*/,\-]+$")
            .map_err(|e| Error::internal_unexpected(e.to_string()))?;

        if fields.len() != 5 || !fields.iter().all(|f| field_re.is_match(f)) {
            return Err(Error::validation_invalid_argument(
                "cron",
                "Expected five cron fields: minute hour day-of-month month day-of-week",
                Some(expression.to_string()),
                None,
            ));
        }
        let timezone =
            validation::require_non_empty(timezone, "timezone", "Timezone cannot be empty")?;

        Ok(Trigger::Crontab {
            minute: fields[0].to_string(),
            hour: fields[1].to_string(),
            day_of_month: fields[2].to_string(),
            month_of_year: fields[3].to_string(),
            day_of_week: fields[4].to_string(),
            timezone: timezone.to_string(),
        })
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval { every, period } => {
                write!(f, "every {} {}", every, period.as_str())
            }
            Trigger::Crontab {
                minute,
                hour,
                day_of_week,
                day_of_month,
                month_of_year,
                timezone,
            } => write!(
                f,
                "{} {} {} {} {} ({})",
                minute, hour, day_of_month, month_of_year, day_of_week, timezone
            ),
        }
    }
}

impl ToSql for Trigger {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let text = serde_json::to_string(self)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::from(text))
    }
}

impl FromSql for Trigger {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        serde_json::from_str(value.as_str()?).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Keyword payload. Always `{"task_id": <own id>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobKwargs {
    pub task_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub one_off: bool,
    pub description: String,
    pub trigger: Trigger,
    pub repository_id: Option<i64>,
    pub profile_id: Option<i64>,
    /// JSON list of strings; the first is the dbt command.
    pub args: String,
    /// JSON object carrying `task_id`.
    pub kwargs: String,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn decoded_args(&self) -> Result<Vec<String>> {
        decode_args(&self.args)
    }

    pub fn decoded_kwargs(&self) -> Result<JobKwargs> {
        decode_kwargs(&self.kwargs)
    }

    /// The dbt command text (first positional argument).
    pub fn command(&self) -> Result<String> {
        self.decoded_args()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::validation_missing_argument(vec!["command".to_string()]))
    }
}

/// Editable job fields, used for both create and update.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub enabled: bool,
    pub one_off: bool,
    pub description: String,
    pub trigger: Trigger,
    pub repository_id: Option<i64>,
    pub profile_id: Option<i64>,
    pub args: Vec<String>,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            one_off: false,
            description: String::new(),
            trigger: Trigger::default(),
            repository_id: None,
            profile_id: None,
            args: Vec::new(),
        }
    }
}

/// Partial update. `Some(None)` clears a reference.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub one_off: Option<bool>,
    pub description: Option<String>,
    pub trigger: Option<Trigger>,
    pub repository_id: Option<Option<i64>>,
    pub profile_id: Option<Option<i64>>,
    pub args: Option<Vec<String>>,
}

pub fn decode_args(text: &str) -> Result<Vec<String>> {
    serde_json::from_str(text).map_err(|e| {
        Error::validation_invalid_json(
            e,
            Some("job args: expected a JSON list of strings".to_string()),
        )
    })
}

pub fn decode_kwargs(text: &str) -> Result<JobKwargs> {
    serde_json::from_str(text).map_err(|e| {
        Error::validation_invalid_json(
            e,
            Some("job kwargs: expected {\"task_id\": <integer>}".to_string()),
        )
    })
}

pub fn encode_args(args: &[String]) -> Result<String> {
    serde_json::to_string(args)
        .map_err(|e| Error::internal_json(e.to_string(), Some("encode job args".to_string())))
}

pub fn encode_kwargs(task_id: i64) -> Result<String> {
    serde_json::to_string(&JobKwargs { task_id })
        .map_err(|e| Error::internal_json(e.to_string(), Some("encode job kwargs".to_string())))
}

/// Split a command line and require its program to be dbt.
///
/// The program's file name must start with `dbt`, so `/opt/venv/bin/dbt`
/// is accepted.
pub fn validate_command(command: &str) -> Result<Vec<String>> {
    let argv = shell::split_command(command)?;
    let program = argv
        .first()
        .ok_or_else(|| Error::validation_missing_argument(vec!["command".to_string()]))?;

    let file_name = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if !file_name.starts_with("dbt") {
        return Err(Error::validation_invalid_argument(
            "command",
            "Command must start with dbt",
            Some(command.to_string()),
            None,
        ));
    }
    Ok(argv)
}

fn check_spec(store: &Store, spec: &JobSpec) -> Result<()> {
    validation::require_non_empty(&spec.name, "name", "Job name cannot be empty")?;
    let command = validation::require(
        spec.args.first(),
        "args",
        "The first argument must be the dbt command",
    )?;
    validate_command(command)?;
    if let Some(repository_id) = spec.repository_id {
        store.get_repository(repository_id)?;
    }
    if let Some(profile_id) = spec.profile_id {
        store.get_profile(profile_id)?;
    }
    Ok(())
}

pub fn create(store: &Store, spec: JobSpec) -> Result<ScheduledJob> {
    check_spec(store, &spec)?;
    let job = store.insert_job(&spec)?;
    tracing::info!(job_id = job.id, name = %job.name, "job created");
    Ok(job)
}

pub fn update(store: &Store, job_id: i64, changes: JobUpdate) -> Result<ScheduledJob> {
    let job = store.get_job(job_id)?;
    let mut spec = JobSpec {
        name: job.name,
        enabled: job.enabled,
        one_off: job.one_off,
        description: job.description,
        trigger: job.trigger,
        repository_id: job.repository_id,
        profile_id: job.profile_id,
        args: decode_args(&job.args)?,
    };

    if let Some(name) = changes.name {
        spec.name = name;
    }
    if let Some(enabled) = changes.enabled {
        spec.enabled = enabled;
    }
    if let Some(one_off) = changes.one_off {
        spec.one_off = one_off;
    }
    if let Some(description) = changes.description {
        spec.description = description;
    }
    if let Some(trigger) = changes.trigger {
        spec.trigger = trigger;
    }
    if let Some(repository_id) = changes.repository_id {
        spec.repository_id = repository_id;
    }
    if let Some(profile_id) = changes.profile_id {
        spec.profile_id = profile_id;
    }
    if let Some(args) = changes.args {
        spec.args = args;
    }

    check_spec(store, &spec)?;
    store.update_job(job_id, &spec)
}

pub fn set_enabled(store: &Store, job_id: i64, enabled: bool) -> Result<ScheduledJob> {
    store.set_job_enabled(job_id, enabled)?;
    store.get_job(job_id)
}

pub fn remove(store: &Store, job_id: i64) -> Result<()> {
    if !store.delete_job(job_id)? {
        return Err(Error::job_not_found(job_id));
    }
    tracing::info!(job_id, "job deleted");
    Ok(())
}
