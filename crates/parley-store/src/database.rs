//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.

use std::path::Path;

use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database in `data_dir`, or in the platform data
    /// directory when none is given:
    /// - Linux:   `~/.local/share/parley/parley.db`
    /// - macOS:   `~/Library/Application Support/com.parley.parley/parley.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\parley\parley\data\parley.db`
    pub fn new(data_dir: Option<&Path>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir.to_path_buf(),
            None => ProjectDirs::from("com", "parley", "parley")
                .ok_or(StoreError::NoDataDir)?
                .data_dir()
                .to_path_buf(),
        };
        std::fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join("parley.db");
        tracing::info!(path = %db_path.display(), "opening local cache");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Throwaway database, used by tests and when no data dir is usable.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    // ------------------------------------------------------------------
    // Key-value access
    // ------------------------------------------------------------------

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn put_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        db.put_value("k", "v").unwrap();
        drop(db);

        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.get_value("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn new_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        let _db = Database::new(Some(&nested)).unwrap();
        assert!(nested.join("parley.db").exists());
    }

    #[test]
    fn kv_put_get() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_value("k").unwrap(), None);

        db.put_value("k", "1").unwrap();
        db.put_value("k", "2").unwrap();
        assert_eq!(db.get_value("k").unwrap().as_deref(), Some("2"));
        assert_eq!(db.get_value("other").unwrap(), None);
    }
}
