use crate::upload_queue::SyncResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sequence number for ordering events
pub type EventSequence = u64;

pub const QUEUE_CHANGE_EVENT: &str = "queue:change";
pub const QUEUE_SYNCED_EVENT: &str = "queue:synced";

/// Every event published by the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    pub sequence: EventSequence,
    pub timestamp: DateTime<Utc>,
    pub payload: QueueEventPayload,
}

/// Kind of mutation reported by a `queue:change` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Updated,
    Cleared,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum QueueEventPayload {
    /// Items were added, removed, reset or cleared.
    /// `id` is set when the change concerns a single item.
    #[serde(rename = "queue:change")]
    Changed {
        #[serde(rename = "type")]
        kind: ChangeKind,
        id: Option<String>,
    },

    /// A synchronization pass completed
    #[serde(rename = "queue:synced")]
    Synced { result: SyncResult },
}

impl QueueEventPayload {
    pub fn changed(kind: ChangeKind, id: Option<&str>) -> Self {
        QueueEventPayload::Changed {
            kind,
            id: id.map(str::to_string),
        }
    }
}

impl QueueEvent {
    /// Event family name (`queue:change` or `queue:synced`)
    pub fn name(&self) -> &'static str {
        match &self.payload {
            QueueEventPayload::Changed { .. } => QUEUE_CHANGE_EVENT,
            QueueEventPayload::Synced { .. } => QUEUE_SYNCED_EVENT,
        }
    }

    pub fn item_id(&self) -> Option<&str> {
        match &self.payload {
            QueueEventPayload::Changed { id, .. } => id.as_deref(),
            QueueEventPayload::Synced { .. } => None,
        }
    }

    pub fn change_kind(&self) -> Option<ChangeKind> {
        match &self.payload {
            QueueEventPayload::Changed { kind, .. } => Some(*kind),
            QueueEventPayload::Synced { .. } => None,
        }
    }
}
