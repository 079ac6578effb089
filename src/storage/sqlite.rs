use super::KeyValueStore;
use crate::error::QueueError;
use crate::logging::log_info;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed key-value table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("conn", &"<connection>")
            .finish()
    }
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the table exists
    pub fn open(path: &Path) -> Result<Self, QueueError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                crate::config::ensure_dir(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn)?;

        log_info(
            "storage",
            &format!("✓ SQLite store opened at {}", path.display()),
        );

        Ok(store)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, QueueError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, QueueError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Helper to get the connection with proper error handling
    fn connection(&self) -> Result<MutexGuard<'_, Connection>, QueueError> {
        self.conn
            .lock()
            .map_err(|_| QueueError::LockPoisoned("sqlite store".into()))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, QueueError> {
        let conn = self.connection()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), QueueError> {
        let conn = self.connection()?;
        let now = Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), QueueError> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_upsert_overwrites() {
        let store = SqliteStore::open_in_memory().unwrap();

        store.set("queue", "[]").unwrap();
        store.set("queue", "[{\"id\":\"bill_1\"}]").unwrap();

        assert_eq!(
            store.get("queue").unwrap(),
            Some("[{\"id\":\"bill_1\"}]".to_string())
        );
    }

    #[test]
    fn test_missing_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get("nope").unwrap(), None);
        store.remove("nope").unwrap();
    }

    #[test]
    fn test_persists_across_connections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("queue.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("@offline_queue/last_sync", "2025-06-01T12:00:00Z").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get("@offline_queue/last_sync").unwrap(),
            Some("2025-06-01T12:00:00Z".to_string())
        );
    }
}
