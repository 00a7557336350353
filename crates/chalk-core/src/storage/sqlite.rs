use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use super::KeyValueStore;
use crate::db::Database;
use crate::error::Result;
use crate::util::unix_timestamp_millis;

/// `SQLite` implementation of [`KeyValueStore`]
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    db: Arc<Database>,
}

impl SqliteKeyValueStore {
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open (and migrate) the database file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(Database::open(path)?)))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Database::open_in_memory()?)))
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.db
            .with_connection(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM kv_store WHERE key = ?",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
                    params![key, value, unix_timestamp_millis()],
                )?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.db
            .with_connection(move |conn| {
                conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_replaces_value() {
        let store = SqliteKeyValueStore::open_in_memory().unwrap();
        store.set("k", "one").await.unwrap();
        store.set("k", "two").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_values_survive_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("kv.db");

        {
            let store = SqliteKeyValueStore::open(&path).unwrap();
            store.set("sync_queue:index", "[\"a\"]").await.unwrap();
            store.set("gone", "x").await.unwrap();
            store.delete("gone").await.unwrap();
        }

        let store = SqliteKeyValueStore::open(&path).unwrap();
        assert_eq!(
            store.get("sync_queue:index").await.unwrap().as_deref(),
            Some("[\"a\"]")
        );
        assert!(store.get("gone").await.unwrap().is_none());
    }
}
