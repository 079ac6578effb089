//! Type definitions for the upload queue system.
//!
//! Defines the queued item record, its status machine, submissions and their
//! duplicate-detection fingerprint, and the sync/status reports.

use super::hashing::calculate_file_hash_sha256;
use crate::error::QueueError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use uuid::Uuid;

/// Prefix of generated item ids
pub const ITEM_ID_PREFIX: &str = "bill_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Uploading,
    Success,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Uploading => "uploading",
            ItemStatus::Success => "success",
            ItemStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The comparable identity of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    #[serde(rename = "storeId")]
    pub store_id: String,
    /// Amount in minor currency units (cents)
    #[serde(rename = "amountMinor")]
    pub amount_minor: i64,
    /// Image reference (URI or path)
    #[serde(rename = "imageRef")]
    pub image_ref: String,
    /// SHA256 of the image bytes, when the caller could compute it
    #[serde(rename = "imageHash", default, skip_serializing_if = "Option::is_none")]
    pub image_hash: Option<String>,
}

/// What the engine accepts: an opaque payload plus its fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub payload: Value,
    pub fingerprint: Fingerprint,
}

impl Submission {
    pub fn new(payload: Value, fingerprint: Fingerprint) -> Self {
        Self {
            payload,
            fingerprint,
        }
    }
}

/// One durable queue record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedItem {
    pub id: String,
    pub payload: Value,
    pub fingerprint: Fingerprint,
    #[serde(rename = "enqueuedAt")]
    pub enqueued_at: DateTime<Utc>,
    pub status: ItemStatus,
    pub attempt: u32,
    #[serde(rename = "lastError", default)]
    pub last_error: Option<String>,
    #[serde(rename = "lastAttemptAt", default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(rename = "remoteId", default)]
    pub remote_id: Option<String>,
    #[serde(rename = "syncedAt", default)]
    pub synced_at: Option<DateTime<Utc>>,
}

impl QueuedItem {
    /// Build a fresh pending item with a generated id
    pub fn new(submission: Submission, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: generate_item_id(),
            payload: submission.payload,
            fingerprint: submission.fingerprint,
            enqueued_at,
            status: ItemStatus::Pending,
            attempt: 0,
            last_error: None,
            last_attempt_at: None,
            remote_id: None,
            synced_at: None,
        }
    }

    /// Return a failed item to `pending`; the attempt count is kept.
    pub fn reset_for_retry(&mut self) {
        self.status = ItemStatus::Pending;
        self.last_error = None;
        self.last_attempt_at = None;
    }
}

pub fn generate_item_id() -> String {
    format!("{}{}", ITEM_ID_PREFIX, Uuid::new_v4().simple())
}

/// A bill captured by the client: store, amount, date and a receipt image.
///
/// Unknown fields are preserved so richer clients can attach their own data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillSubmission {
    #[serde(rename = "storeId")]
    pub store_id: String,
    pub amount: f64,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "imageUri")]
    pub image_uri: String,
    #[serde(rename = "imageHash", default, skip_serializing_if = "Option::is_none")]
    pub image_hash: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BillSubmission {
    pub fn new(
        store_id: impl Into<String>,
        amount: f64,
        date: NaiveDate,
        image_uri: impl Into<String>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            amount,
            date,
            category: None,
            image_uri: image_uri.into(),
            image_hash: None,
            extra: Map::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_image_hash(mut self, hash: impl Into<String>) -> Self {
        self.image_hash = Some(hash.into());
        self
    }

    /// Hash the receipt image so re-saved copies of the same photo match
    pub fn with_image_file(mut self, path: &Path) -> Result<Self, QueueError> {
        self.image_hash = Some(calculate_file_hash_sha256(path)?);
        Ok(self)
    }

    /// Amount rounded to minor units
    pub fn amount_minor(&self) -> i64 {
        (self.amount * 100.0).round() as i64
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            store_id: self.store_id.trim().to_string(),
            amount_minor: self.amount_minor(),
            image_ref: self.image_uri.clone(),
            image_hash: self.image_hash.clone(),
        }
    }

    pub fn into_submission(self) -> Result<Submission, serde_json::Error> {
        let fingerprint = self.fingerprint();
        let payload = serde_json::to_value(&self)?;
        Ok(Submission::new(payload, fingerprint))
    }
}

/// Per-item failure recorded in a sync result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub id: String,
    pub error: String,
}

/// Aggregated outcome of one synchronization pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub successful: usize,
    pub failed: usize,
    /// Pending items left for a later pass because their backoff had not elapsed
    pub skipped: usize,
    pub errors: Vec<SyncFailure>,
}

impl SyncResult {
    pub fn attempted(&self) -> usize {
        self.successful + self.failed
    }
}

/// Snapshot returned by `get_status()`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub success: usize,
    pub failed: usize,
    #[serde(rename = "lastSync")]
    pub last_sync: Option<DateTime<Utc>>,
}

impl QueueStatus {
    pub fn from_items<'a>(
        items: impl IntoIterator<Item = &'a QueuedItem>,
        last_sync: Option<DateTime<Utc>>,
    ) -> Self {
        let mut status = QueueStatus {
            last_sync,
            ..Default::default()
        };
        for item in items {
            match item.status {
                ItemStatus::Pending => status.pending += 1,
                ItemStatus::Uploading => status.uploading += 1,
                ItemStatus::Success => status.success += 1,
                ItemStatus::Failed => status.failed += 1,
            }
            status.total += 1;
        }
        status
    }
}
