//! Database connection management

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;

use super::migrations;

/// Database wrapper for the on-device `SQLite` file
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let database = Self { conn };
        database.configure()?;
        database.migrate()?;
        tracing::debug!("Opened local store at {}", path.as_ref().display());
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let database = Self { conn };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    fn configure(&self) -> Result<()> {
        // WAL is unavailable for in-memory databases; the pragma reports the
        // mode it actually picked instead of failing.
        self.conn
            .query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .ok();
        self.conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = 10000;",
        )?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn)
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let one: i64 = db
            .connection()
            .query_row("SELECT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn test_open_file_persists_between_handles() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("selah.db");

        {
            let db = Database::open(&path).unwrap();
            db.connection()
                .execute(
                    "INSERT INTO verse_cache (translation, book, chapter, verse, text, fetched_at)
                     VALUES ('KJV', 'John', 11, 35, 'Jesus wept.', 0)",
                    [],
                )
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM verse_cache", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
