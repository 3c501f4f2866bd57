//! SQLite database for meshgate state persistence

use crate::store::{Collection, RecordStore};
use crate::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;

        // WAL journal, relaxed fsync
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, key)
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }
}

impl RecordStore for Database {
    fn read(&self, collection: Collection, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();

        let value = conn
            .query_row(
                "SELECT value FROM records WHERE collection = ?1 AND key = ?2",
                params![collection.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value)
    }

    fn read_all(&self, collection: Collection) -> Result<Vec<String>> {
        let conn = self.conn.lock();

        let mut stmt =
            conn.prepare("SELECT value FROM records WHERE collection = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![collection.as_str()], |row| row.get(0))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }

    fn write(&self, collection: Collection, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT OR REPLACE INTO records (collection, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![collection.as_str(), key, value, now],
        )?;

        debug!("Wrote {}.{}", collection, key);
        Ok(())
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND key = ?2",
            params![collection.as_str(), key],
        )?;

        if rows > 0 {
            debug!("Deleted {}.{}", collection, key);
        }

        Ok(rows > 0)
    }
}
