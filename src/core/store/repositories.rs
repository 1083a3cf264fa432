use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::{Error, Result};
use crate::repository::Repository;

const COLUMNS: &str = "id, name, url, credential_id, created_at";

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        credential_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl Store {
    pub fn insert_repository(
        &self,
        name: Option<&str>,
        url: &str,
        credential_id: Option<i64>,
    ) -> Result<Repository> {
        let created_at = Utc::now();
        self.conn().execute(
            "INSERT INTO repositories (name, url, credential_id, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![name, url, credential_id, created_at],
        )?;
        Ok(Repository {
            id: self.conn().last_insert_rowid(),
            name: name.map(str::to_string),
            url: url.to_string(),
            credential_id,
            created_at,
        })
    }

    pub fn get_repository(&self, id: i64) -> Result<Repository> {
        self.conn()
            .query_row(
                &format!("SELECT {} FROM repositories WHERE id = ?1", COLUMNS),
                params![id],
                repository_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::repository_not_found(id))
    }

    pub fn list_repositories(&self) -> Result<Vec<Repository>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {} FROM repositories ORDER BY id", COLUMNS))?;
        let rows = stmt.query_map([], repository_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Persist name, URL and credential of an existing repository.
    pub fn update_repository(&self, repository: &Repository) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE repositories SET name = ?1, url = ?2, credential_id = ?3 WHERE id = ?4",
            params![
                repository.name,
                repository.url,
                repository.credential_id,
                repository.id
            ],
        )?;
        if updated == 0 {
            return Err(Error::repository_not_found(repository.id));
        }
        Ok(())
    }

    pub fn delete_repository(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM repositories WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}
