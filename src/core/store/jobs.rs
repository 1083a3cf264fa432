use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::{Error, Result};
use crate::job::{self, JobSpec, ScheduledJob};

const COLUMNS: &str = "id, name, enabled, one_off, description, trigger_spec, repository_id, \
                       profile_id, args, kwargs, created_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledJob> {
    Ok(ScheduledJob {
        id: row.get(0)?,
        name: row.get(1)?,
        enabled: row.get(2)?,
        one_off: row.get(3)?,
        description: row.get(4)?,
        trigger: row.get(5)?,
        repository_id: row.get(6)?,
        profile_id: row.get(7)?,
        args: row.get(8)?,
        kwargs: row.get(9)?,
        created_at: row.get(10)?,
    })
}

impl Store {
    /// Insert a job and stamp its keyword payload with the new id.
    pub fn insert_job(&self, spec: &JobSpec) -> Result<ScheduledJob> {
        let args = job::encode_args(&spec.args)?;
        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO jobs (name, enabled, one_off, description, trigger_spec, repository_id, \
             profile_id, args, kwargs, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '{}', ?9)",
            params![
                spec.name,
                spec.enabled,
                spec.one_off,
                spec.description,
                spec.trigger,
                spec.repository_id,
                spec.profile_id,
                args,
                Utc::now()
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE jobs SET kwargs = ?1 WHERE id = ?2",
            params![job::encode_kwargs(id)?, id],
        )?;
        tx.commit()?;
        self.get_job(id)
    }

    pub fn get_job(&self, id: i64) -> Result<ScheduledJob> {
        self.conn()
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", COLUMNS),
                params![id],
                job_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::job_not_found(id))
    }

    pub fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {} FROM jobs ORDER BY id", COLUMNS))?;
        let rows = stmt.query_map([], job_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Replace every editable field. The keyword payload is rewritten too.
    pub fn update_job(&self, id: i64, spec: &JobSpec) -> Result<ScheduledJob> {
        let updated = self.conn().execute(
            "UPDATE jobs SET name = ?1, enabled = ?2, one_off = ?3, description = ?4, \
             trigger_spec = ?5, repository_id = ?6, profile_id = ?7, args = ?8, kwargs = ?9 \
             WHERE id = ?10",
            params![
                spec.name,
                spec.enabled,
                spec.one_off,
                spec.description,
                spec.trigger,
                spec.repository_id,
                spec.profile_id,
                job::encode_args(&spec.args)?,
                job::encode_kwargs(id)?,
                id
            ],
        )?;
        if updated == 0 {
            return Err(Error::job_not_found(id));
        }
        self.get_job(id)
    }

    pub fn set_job_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE jobs SET enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        if updated == 0 {
            return Err(Error::job_not_found(id));
        }
        Ok(())
    }

    pub fn delete_job(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}
