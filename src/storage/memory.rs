use super::KeyValueStore;
use crate::error::QueueError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-process store, shared between clones. State is lost on drop of the
/// last clone, which makes it the store of choice for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, QueueError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| QueueError::LockPoisoned("memory store".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), QueueError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| QueueError::LockPoisoned("memory store".into()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), QueueError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| QueueError::LockPoisoned("memory store".into()))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_entries() {
        let store = MemoryStore::new();
        let clone = store.clone();

        store.set("a", "1").unwrap();
        assert_eq!(clone.get("a").unwrap(), Some("1".to_string()));

        clone.remove("a").unwrap();
        assert!(store.is_empty());
        assert_eq!(store.get("a").unwrap(), None);
    }
}
