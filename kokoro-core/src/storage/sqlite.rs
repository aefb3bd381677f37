//! SQLite-backed key-value storage.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::KeyValueStorage;

pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema()?;

        info!(path = %path.display(), "SQLite storage opened");
        Ok(storage)
    }

    /// In-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let storage = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| anyhow!("storage lock poisoned"))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        debug!("kv schema initialized");
        Ok(())
    }

    /// Run a blocking closure against the connection off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<T> {
            let guard = conn.lock().map_err(|_| anyhow!("storage lock poisoned"))?;
            f(&*guard)
        })
        .await?
    }
}

#[async_trait]
impl KeyValueStorage for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, chrono::Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| Ok(conn.execute("DELETE FROM kv WHERE key = ?1", params![key])? > 0))
            .await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            // substr comparison avoids LIKE wildcard escaping
            let mut stmt = conn.prepare(
                "SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key ASC",
            )?;
            let keys = stmt
                .query_map(params![prefix], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_get_remove() {
        let storage = SqliteStorage::in_memory().unwrap();
        assert_eq!(storage.get("profile").await.unwrap(), None);

        storage.set("profile", "{\"a\":1}").await.unwrap();
        storage.set("profile", "{\"a\":2}").await.unwrap();
        assert_eq!(storage.get("profile").await.unwrap().as_deref(), Some("{\"a\":2}"));

        assert!(storage.remove("profile").await.unwrap());
        assert!(!storage.remove("profile").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_by_prefix_sorted() {
        let storage = SqliteStorage::in_memory().unwrap();
        for key in ["backup/2", "backup/1", "backups_misc", "profile", "backup%x"] {
            storage.set(key, "{}").await.unwrap();
        }
        let keys = storage.keys("backup/").await.unwrap();
        assert_eq!(keys, vec!["backup/1", "backup/2"]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("kokoro.db");
        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.set("preferences", "{}").await.unwrap();
        }
        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(storage.get("preferences").await.unwrap().as_deref(), Some("{}"));
    }
}
