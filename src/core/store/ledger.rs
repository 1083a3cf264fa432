//! Run ledger: one row per job execution plus its argument snapshot.
//!
//! A run is inserted as `pending` before any work starts and finalized exactly
//! once as `succeeded` or `failed`. Finalized rows are never touched again.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use super::Store;
use crate::artifacts::{self, Artifacts};
use crate::error::{Error, Result};

/// Stored as `previous_command` when no earlier run exists.
pub const FIRST_COMMAND_SENTINEL: &str = "this is first commands";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl ToSql for RunStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RunStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "pending" => Ok(RunStatus::Pending),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(FromSqlError::Other(
                format!("unknown run status '{}'", other).into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub run_uuid: String,
    pub status: RunStatus,
    pub manifest: Option<Value>,
    pub run_results: Option<Value>,
    pub sources: Option<Value>,
    pub catalog: Option<Value>,
    pub missing_artifacts: Vec<String>,
    pub command: Option<String>,
    pub previous_command: Option<String>,
    pub success: bool,
    pub fail_reason: Option<String>,
    pub exit_code: Option<i32>,
    pub repository_used_name: Option<String>,
    pub profile_yml_used_name: Option<String>,
    pub periodic_task_name: Option<String>,
    pub profile_sha256: Option<String>,
    pub dbt_stdout: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Repository whose lock the run holds while pending.
    pub repository_id: Option<i64>,
}

/// Names captured when a run starts. They survive deletion of the originals.
#[derive(Debug, Clone, Default)]
pub struct PendingRun {
    pub command: Option<String>,
    pub repository_id: Option<i64>,
    pub repository_used_name: Option<String>,
    pub profile_yml_used_name: Option<String>,
    pub periodic_task_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub artifacts: Artifacts,
    pub exit_code: Option<i32>,
    pub dbt_stdout: String,
    pub profile_sha256: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunFailure {
    pub fail_reason: String,
    pub exit_code: Option<i32>,
    pub dbt_stdout: Option<String>,
    pub profile_sha256: Option<String>,
}

/// Flattened copy of `run_results.args`. Absent fields are empty text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArgSnapshot {
    pub quiet: String,
    pub which: String,
    pub no_print: String,
    pub rpc_method: String,
    pub use_colors: String,
    pub write_json: String,
    pub profiles_dir: String,
    pub partial_parse: String,
    pub printer_width: String,
    pub static_parser: String,
    pub version_check: String,
    pub event_buffer_size: String,
    pub indirect_selection: String,
    pub send_anonymous: String,
    pub usage_stats: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredArgSnapshot {
    pub alias: i64,
    pub run_record_id: i64,
    #[serde(flatten)]
    pub snapshot: ArgSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubprocessLog {
    pub id: i64,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

const RUN_COLUMNS: &str = "id, run_uuid, status, manifest, run_results, sources, catalog, \
    missing_artifacts, command, previous_command, success, fail_reason, exit_code, \
    repository_used_name, profile_yml_used_name, periodic_task_name, profile_sha256, \
    dbt_stdout, created_at, completed_at, repository_id";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let missing: Value = row.get(7)?;
    Ok(RunRecord {
        id: row.get(0)?,
        run_uuid: row.get(1)?,
        status: row.get(2)?,
        manifest: row.get(3)?,
        run_results: row.get(4)?,
        sources: row.get(5)?,
        catalog: row.get(6)?,
        missing_artifacts: serde_json::from_value(missing).unwrap_or_default(),
        command: row.get(8)?,
        previous_command: row.get(9)?,
        success: row.get(10)?,
        fail_reason: row.get(11)?,
        exit_code: row.get(12)?,
        repository_used_name: row.get(13)?,
        profile_yml_used_name: row.get(14)?,
        periodic_task_name: row.get(15)?,
        profile_sha256: row.get(16)?,
        dbt_stdout: row.get(17)?,
        created_at: row.get(18)?,
        completed_at: row.get(19)?,
        repository_id: row.get(20)?,
    })
}

impl Store {
    /// Command of the most recently created run, pending ones included.
    /// `None` when the ledger is empty, `Some(None)` when that run had no
    /// command.
    pub fn latest_command(&self) -> Result<Option<Option<String>>> {
        let command = self
            .conn()
            .query_row(
                "SELECT command FROM run_records ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(command)
    }

    /// Write transaction that takes the database write lock up front. A
    /// deferred one that reads first cannot wait out a concurrent writer.
    fn begin_immediate(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            self.conn(),
            TransactionBehavior::Immediate,
        )?)
    }

    /// Insert a `pending` run. `previous_command` is resolved in the same
    /// transaction so two starting runs never see the same predecessor.
    pub fn insert_pending(&self, pending: &PendingRun) -> Result<RunRecord> {
        let tx = self.begin_immediate()?;
        let id = self.insert_pending_row(pending)?;
        tx.commit()?;
        self.get_run(id)
    }

    fn insert_pending_row(&self, pending: &PendingRun) -> Result<i64> {
        let previous_command = match self.latest_command()? {
            Some(command) => command,
            None => Some(FIRST_COMMAND_SENTINEL.to_string()),
        };

        let run_uuid = uuid::Uuid::new_v4().to_string();
        self.conn().execute(
            "INSERT INTO run_records (run_uuid, status, command, previous_command, success, \
             repository_id, repository_used_name, profile_yml_used_name, periodic_task_name, \
             created_at) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?8, ?9)",
            params![
                run_uuid,
                RunStatus::Pending,
                pending.command,
                previous_command,
                pending.repository_id,
                pending.repository_used_name,
                pending.profile_yml_used_name,
                pending.periodic_task_name,
                Utc::now()
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn finalize_success(&self, run_id: i64, outcome: &RunOutcome) -> Result<RunRecord> {
        let missing = serde_json::to_value(&outcome.artifacts.missing).map_err(|e| {
            Error::internal_json(e.to_string(), Some("encode missing artifacts".into()))
        })?;
        let updated = self.conn().execute(
            "UPDATE run_records SET status = ?1, manifest = ?2, run_results = ?3, sources = ?4, \
             catalog = ?5, missing_artifacts = ?6, success = 1, exit_code = ?7, dbt_stdout = ?8, \
             profile_sha256 = ?9, completed_at = ?10 \
             WHERE id = ?11 AND status = 'pending'",
            params![
                RunStatus::Succeeded,
                outcome.artifacts.manifest,
                outcome.artifacts.run_results,
                outcome.artifacts.sources,
                outcome.artifacts.catalog,
                missing,
                outcome.exit_code,
                outcome.dbt_stdout,
                outcome.profile_sha256,
                Utc::now(),
                run_id
            ],
        )?;
        self.finalized(run_id, updated)
    }

    /// Finalize as failed. Artifacts are never stored on this path.
    pub fn finalize_failure(&self, run_id: i64, failure: &RunFailure) -> Result<RunRecord> {
        let updated = self.conn().execute(
            "UPDATE run_records SET status = ?1, success = 0, fail_reason = ?2, exit_code = ?3, \
             dbt_stdout = ?4, profile_sha256 = ?5, completed_at = ?6 \
             WHERE id = ?7 AND status = 'pending'",
            params![
                RunStatus::Failed,
                failure.fail_reason,
                failure.exit_code,
                failure.dbt_stdout,
                failure.profile_sha256,
                Utc::now(),
                run_id
            ],
        )?;
        self.finalized(run_id, updated)
    }

    fn finalized(&self, run_id: i64, updated: usize) -> Result<RunRecord> {
        if updated == 0 {
            let run = self.get_run(run_id)?;
            return Err(Error::internal_unexpected(format!(
                "Run {} is already {}",
                run_id,
                run.status.as_str()
            )));
        }
        self.get_run(run_id)
    }

    pub fn get_run(&self, id: i64) -> Result<RunRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {} FROM run_records WHERE id = ?1", RUN_COLUMNS),
                params![id],
                run_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::run_not_found(id))
    }

    /// Newest first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM run_records ORDER BY id DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], run_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Runs still `pending`: live ones and ones whose process died.
    pub fn orphaned_runs(&self) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM run_records WHERE status = 'pending' ORDER BY id",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map([], run_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Fail the given runs if they are still pending. Callers decide which
    /// runs are dead; see `runner::recover_orphans`.
    pub fn mark_orphans_failed(&self, run_ids: &[i64], reason: &str) -> Result<usize> {
        let mut stmt = self.conn().prepare(
            "UPDATE run_records SET status = ?1, success = 0, fail_reason = ?2, completed_at = ?3 \
             WHERE id = ?4 AND status = 'pending'",
        )?;
        let mut updated = 0;
        for id in run_ids {
            updated += stmt.execute(params![RunStatus::Failed, reason, Utc::now(), *id])?;
        }
        Ok(updated)
    }

    pub fn insert_arg_snapshot(&self, run_id: i64, snapshot: &ArgSnapshot) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO arg_snapshots (run_record_id, quiet, which, no_print, rpc_method, \
             use_colors, write_json, profiles_dir, partial_parse, printer_width, static_parser, \
             version_check, event_buffer_size, indirect_selection, send_anonymous, usage_stats) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                run_id,
                snapshot.quiet,
                snapshot.which,
                snapshot.no_print,
                snapshot.rpc_method,
                snapshot.use_colors,
                snapshot.write_json,
                snapshot.profiles_dir,
                snapshot.partial_parse,
                snapshot.printer_width,
                snapshot.static_parser,
                snapshot.version_check,
                snapshot.event_buffer_size,
                snapshot.indirect_selection,
                snapshot.send_anonymous,
                snapshot.usage_stats
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn arg_snapshot_for(&self, run_id: i64) -> Result<Option<StoredArgSnapshot>> {
        let snapshot = self
            .conn()
            .query_row(
                "SELECT alias, run_record_id, quiet, which, no_print, rpc_method, use_colors, \
                 write_json, profiles_dir, partial_parse, printer_width, static_parser, \
                 version_check, event_buffer_size, indirect_selection, send_anonymous, usage_stats \
                 FROM arg_snapshots WHERE run_record_id = ?1 ORDER BY alias DESC LIMIT 1",
                params![run_id],
                |row| {
                    Ok(StoredArgSnapshot {
                        alias: row.get(0)?,
                        run_record_id: row.get(1)?,
                        snapshot: ArgSnapshot {
                            quiet: row.get(2)?,
                            which: row.get(3)?,
                            no_print: row.get(4)?,
                            rpc_method: row.get(5)?,
                            use_colors: row.get(6)?,
                            write_json: row.get(7)?,
                            profiles_dir: row.get(8)?,
                            partial_parse: row.get(9)?,
                            printer_width: row.get(10)?,
                            static_parser: row.get(11)?,
                            version_check: row.get(12)?,
                            event_buffer_size: row.get(13)?,
                            indirect_selection: row.get(14)?,
                            send_anonymous: row.get(15)?,
                            usage_stats: row.get(16)?,
                        },
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    pub fn log_subprocess(&self, details: &str) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO subprocess_logs (details, created_at) VALUES (?1, ?2)",
            params![details, Utc::now()],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Newest first.
    pub fn list_subprocess_logs(&self, limit: usize) -> Result<Vec<SubprocessLog>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, details, created_at FROM subprocess_logs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(SubprocessLog {
                id: row.get(0)?,
                details: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Record the artifacts found in an arbitrary dbt target directory as a
    /// completed run with no command. The row is never visible as pending.
    pub fn import_artifacts(&self, target_dir: &Path) -> Result<RunRecord> {
        if !target_dir.is_dir() {
            return Err(Error::validation_invalid_argument(
                "dir",
                format!("Not a directory: {}", target_dir.display()),
                None,
                None,
            ));
        }
        let collected = artifacts::collect(target_dir);
        let snapshot = artifacts::arg_snapshot(&collected.run_results);
        let tx = self.begin_immediate()?;
        let id = self.insert_pending_row(&PendingRun::default())?;
        let record = self.finalize_success(
            id,
            &RunOutcome {
                artifacts: collected,
                exit_code: None,
                dbt_stdout: String::new(),
                profile_sha256: None,
            },
        )?;
        self.insert_arg_snapshot(record.id, &snapshot)?;
        tx.commit()?;
        Ok(record)
    }
}
