//! Local persistent key-value storage.
//!
//! The durable queue and the auth session cache persist through this
//! get/set/delete interface so they can run against SQLite on disk or a plain
//! map in tests.

mod memory;
mod sqlite;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryKeyValueStore;
pub use sqlite::SqliteKeyValueStore;

/// String key-value storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace the value under `key`
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; absent keys are not an error
    async fn delete(&self, key: &str) -> Result<()>;
}
