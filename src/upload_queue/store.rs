//! In-memory queue state mirrored to a durable key-value store.
//!
//! Items are kept in insertion order and indexed by id. Every management
//! mutation is written through as a full overwrite of the item list; when the
//! write fails the in-memory change is rolled back.

use super::types::{ItemStatus, QueuedItem};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::logging::{log_info, log_warn};
use crate::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

pub struct QueuedItemStore {
    items: IndexMap<String, QueuedItem>,
    last_sync: Option<DateTime<Utc>>,
    storage: Arc<dyn KeyValueStore>,
    queue_key: String,
    last_sync_key: String,
    max_queue_size: usize,
}

impl std::fmt::Debug for QueuedItemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedItemStore")
            .field("items", &self.items.len())
            .field("last_sync", &self.last_sync)
            .field("storage", &"<key-value store>")
            .field("queue_key", &self.queue_key)
            .field("max_queue_size", &self.max_queue_size)
            .finish()
    }
}

impl QueuedItemStore {
    pub fn new(storage: Arc<dyn KeyValueStore>, config: &QueueConfig) -> Self {
        Self {
            items: IndexMap::new(),
            last_sync: None,
            storage,
            queue_key: config.queue_key(),
            last_sync_key: config.last_sync_key(),
            max_queue_size: config.max_queue_size,
        }
    }

    /// Restore state from durable storage.
    ///
    /// Missing, unreadable or corrupt data yields an empty queue. Items left in
    /// `uploading` by an interrupted pass are reset to `pending`. Returns the
    /// number of recovered items.
    pub fn load(&mut self) -> usize {
        self.items = IndexMap::new();
        let mut recovered = 0;

        for mut item in self.read_persisted_items() {
            if item.status == ItemStatus::Uploading {
                item.status = ItemStatus::Pending;
                recovered += 1;
            }
            if self.items.contains_key(&item.id) {
                log_warn(
                    "upload-queue",
                    &format!("⚠ Dropping duplicate persisted id {}", item.id),
                );
                continue;
            }
            self.items.insert(item.id.clone(), item);
        }

        self.last_sync = self.read_last_sync();

        if recovered > 0 {
            log_info(
                "upload-queue",
                &format!(
                    "↻ Recovered {} interrupted upload(s) back to pending",
                    recovered
                ),
            );
        }
        log_info(
            "upload-queue",
            &format!("📥 Loaded {} queued item(s)", self.items.len()),
        );

        recovered
    }

    fn read_persisted_items(&self) -> Vec<QueuedItem> {
        let raw = match self.storage.get(&self.queue_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log_warn(
                    "upload-queue",
                    &format!("⚠ Could not read persisted queue, starting empty: {}", e),
                );
                return Vec::new();
            }
        };

        let entries: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                log_warn(
                    "upload-queue",
                    &format!("⚠ Persisted queue is corrupt, starting empty: {}", e),
                );
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<QueuedItem>(entry) {
                Ok(item) => Some(item),
                Err(e) => {
                    log_warn(
                        "upload-queue",
                        &format!("⚠ Skipping unreadable queue entry: {}", e),
                    );
                    None
                }
            })
            .collect()
    }

    fn read_last_sync(&self) -> Option<DateTime<Utc>> {
        let raw = self.storage.get(&self.last_sync_key).ok().flatten()?;
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|at| at.with_timezone(&Utc))
            .ok()
    }

    /// Overwrite the persisted item list with the in-memory one
    pub fn persist(&self) -> Result<(), QueueError> {
        let items: Vec<&QueuedItem> = self.items.values().collect();
        let serialized = serde_json::to_string(&items)?;
        self.storage.set(&self.queue_key, &serialized)
    }

    /// Persist the completion time of a synchronization pass
    pub fn record_sync(&mut self, at: DateTime<Utc>) -> Result<(), QueueError> {
        self.storage.set(&self.last_sync_key, &at.to_rfc3339())?;
        self.last_sync = Some(at);
        Ok(())
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&QueuedItem> {
        self.items.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut QueuedItem> {
        self.items.get_mut(id)
    }

    /// Items in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &QueuedItem> {
        self.items.values()
    }

    pub fn items(&self) -> Vec<QueuedItem> {
        self.items.values().cloned().collect()
    }

    pub fn append(&mut self, item: QueuedItem) -> Result<(), QueueError> {
        let max = self.max_queue_size;
        self.transact(|items| {
            if items.len() >= max {
                return Err(QueueError::QueueFull { max });
            }
            if items.contains_key(&item.id) {
                return Err(QueueError::Storage(format!(
                    "Item id {} already exists",
                    item.id
                )));
            }
            items.insert(item.id.clone(), item);
            Ok(())
        })
    }

    pub fn remove(&mut self, id: &str) -> Result<QueuedItem, QueueError> {
        self.transact(|items| {
            items
                .shift_remove(id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))
        })
    }

    /// Keep only items matching `keep`; returns how many were removed
    pub fn retain<F>(&mut self, mut keep: F) -> Result<usize, QueueError>
    where
        F: FnMut(&QueuedItem) -> bool,
    {
        self.transact(|items| {
            let before = items.len();
            items.retain(|_, item| keep(item));
            Ok(before - items.len())
        })
    }

    pub fn clear(&mut self) -> Result<usize, QueueError> {
        self.transact(|items| {
            let removed = items.len();
            items.clear();
            Ok(removed)
        })
    }

    /// Apply `update` to every item matching `select`; returns the match count
    pub fn update_where<P, U>(&mut self, mut select: P, mut update: U) -> Result<usize, QueueError>
    where
        P: FnMut(&QueuedItem) -> bool,
        U: FnMut(&mut QueuedItem),
    {
        self.transact(|items| {
            let mut updated = 0;
            for item in items.values_mut().filter(|item| select(item)) {
                update(item);
                updated += 1;
            }
            Ok(updated)
        })
    }

    /// Run a mutation and persist it, restoring the previous state on failure
    fn transact<R, F>(&mut self, mutation: F) -> Result<R, QueueError>
    where
        F: FnOnce(&mut IndexMap<String, QueuedItem>) -> Result<R, QueueError>,
    {
        let snapshot = self.items.clone();

        let result = match mutation(&mut self.items) {
            Ok(result) => result,
            Err(e) => {
                self.items = snapshot;
                return Err(e);
            }
        };

        if let Err(e) = self.persist() {
            self.items = snapshot;
            return Err(e);
        }

        Ok(result)
    }
}
