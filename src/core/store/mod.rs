//! SQLite persistence for every dbtrun entity.
//!
//! One `Store` wraps one connection. Entity-specific queries live in the
//! submodules as `impl Store` blocks.

mod credentials;
mod jobs;
pub mod ledger;
mod profiles;
mod repositories;

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::utils::io;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS credentials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    url TEXT NOT NULL,
    credential_id INTEGER UNIQUE REFERENCES credentials(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    yaml TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    enabled INTEGER NOT NULL DEFAULT 1,
    one_off INTEGER NOT NULL DEFAULT 0,
    description TEXT NOT NULL DEFAULT '',
    trigger_spec TEXT NOT NULL,
    repository_id INTEGER REFERENCES repositories(id) ON DELETE SET NULL,
    profile_id INTEGER REFERENCES profiles(id) ON DELETE SET NULL,
    args TEXT NOT NULL DEFAULT '[]',
    kwargs TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS run_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_uuid TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    manifest TEXT,
    run_results TEXT,
    sources TEXT,
    catalog TEXT,
    missing_artifacts TEXT NOT NULL DEFAULT '[]',
    command TEXT,
    previous_command TEXT,
    success INTEGER NOT NULL DEFAULT 1,
    fail_reason TEXT,
    exit_code INTEGER,
    repository_used_name TEXT,
    profile_yml_used_name TEXT,
    periodic_task_name TEXT,
    profile_sha256 TEXT,
    dbt_stdout TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    repository_id INTEGER
);

CREATE INDEX IF NOT EXISTS run_records_status ON run_records(status);

CREATE TABLE IF NOT EXISTS arg_snapshots (
    alias INTEGER PRIMARY KEY AUTOINCREMENT,
    run_record_id INTEGER REFERENCES run_records(id) ON DELETE CASCADE,
    quiet TEXT,
    which TEXT,
    no_print TEXT,
    rpc_method TEXT,
    use_colors TEXT,
    write_json TEXT,
    profiles_dir TEXT,
    partial_parse TEXT,
    printer_width TEXT,
    static_parser TEXT,
    version_check TEXT,
    event_buffer_size TEXT,
    indirect_selection TEXT,
    send_anonymous TEXT,
    usage_stats TEXT
);

CREATE TABLE IF NOT EXISTS subprocess_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    details TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            io::ensure_dir(parent, "create database directory")?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_applies_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dbtrun.db");

        drop(Store::open(&path).unwrap());
        let store = Store::open(&path).unwrap();

        let tables: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 7);
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let store = Store::open_in_memory().unwrap();
        let enabled: i64 = store
            .conn()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
