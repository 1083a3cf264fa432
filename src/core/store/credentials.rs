use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::credential::Credential;
use crate::error::{Error, Result};

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<Credential> {
    Ok(Credential {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

impl Store {
    pub fn insert_credential(&self, name: &str) -> Result<Credential> {
        let created_at = Utc::now();
        self.conn().execute(
            "INSERT INTO credentials (name, created_at) VALUES (?1, ?2)",
            params![name, created_at],
        )?;
        Ok(Credential {
            id: self.conn().last_insert_rowid(),
            name: name.to_string(),
            created_at,
        })
    }

    pub fn get_credential(&self, id: i64) -> Result<Credential> {
        self.conn()
            .query_row(
                "SELECT id, name, created_at FROM credentials WHERE id = ?1",
                params![id],
                credential_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::credential_not_found(id))
    }

    pub fn list_credentials(&self) -> Result<Vec<Credential>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, name, created_at FROM credentials ORDER BY id")?;
        let rows = stmt.query_map([], credential_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn delete_credential(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM credentials WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Id of the repository holding this credential, if any.
    pub fn repository_for_credential(&self, credential_id: i64) -> Result<Option<i64>> {
        let id = self
            .conn()
            .query_row(
                "SELECT id FROM repositories WHERE credential_id = ?1",
                params![credential_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}
