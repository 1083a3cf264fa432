use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::{Error, Result};
use crate::profile::{Profile, ProfileName};

const COLUMNS: &str = "id, name, yaml, updated_at";

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        name: row.get(1)?,
        yaml: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

impl Store {
    pub fn get_profile(&self, id: i64) -> Result<Profile> {
        self.conn()
            .query_row(
                &format!("SELECT {} FROM profiles WHERE id = ?1", COLUMNS),
                params![id],
                profile_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::profile_not_found(id))
    }

    pub fn find_profile(&self, name: ProfileName) -> Result<Option<Profile>> {
        let profile = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM profiles WHERE name = ?1", COLUMNS),
                params![name],
                profile_from_row,
            )
            .optional()?;
        Ok(profile)
    }

    pub fn list_profiles(&self) -> Result<Vec<Profile>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {} FROM profiles ORDER BY id", COLUMNS))?;
        let rows = stmt.query_map([], profile_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn count_profiles(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Insert the profile or replace the YAML of the existing row with that name.
    pub fn upsert_profile(&self, name: ProfileName, yaml: &str) -> Result<Profile> {
        let updated_at = Utc::now();
        self.conn().execute(
            "INSERT INTO profiles (name, yaml, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET yaml = excluded.yaml,
             updated_at = excluded.updated_at",
            params![name, yaml, updated_at],
        )?;
        self.find_profile(name)?
            .ok_or_else(|| Error::profile_not_found(name))
    }

    pub fn delete_profile(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}
