//! Durable key-value storage backends.
//!
//! The queue engine persists its state as opaque strings under two keys.
//! Any backend implementing [`KeyValueStore`] can hold them.

mod file;
mod memory;
mod sqlite;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::QueueError;

/// Persistent string-keyed store.
///
/// Writes are full-value overwrites; backends never interpret keys or values.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, `None` when absent
    fn get(&self, key: &str) -> Result<Option<String>, QueueError>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), QueueError>;

    /// Delete `key`; deleting an absent key is not an error
    fn remove(&self, key: &str) -> Result<(), QueueError>;
}
