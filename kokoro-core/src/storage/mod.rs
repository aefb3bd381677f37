//! Key-value storage collaborator for persisted state blobs.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use kokoro_common::StorageConfig;
use std::sync::Arc;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// String-keyed store of serialized JSON values.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    /// Backend name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Remove a key. Returns whether it existed.
    async fn remove(&self, key: &str) -> anyhow::Result<bool>;

    /// All keys starting with `prefix`, sorted ascending.
    async fn keys(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

/// Open the backend named in configuration.
pub fn open(config: &StorageConfig) -> anyhow::Result<Arc<dyn KeyValueStorage>> {
    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteStorage::open(config.database_path())?)),
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        other => anyhow::bail!("Unknown storage backend: {other}"),
    }
}
