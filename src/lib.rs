//! Offline-first upload queue and synchronization engine for bills.
//!
//! Submissions are persisted through a [`storage::KeyValueStore`], survive
//! restarts, and are uploaded in bounded concurrent batches whenever a
//! synchronization pass runs while the device is online.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod shutdown;
pub mod storage;
pub mod upload_queue;

pub use config::{BackoffConfig, QueueConfig, ServerConfig};
pub use error::{QueueError, UploadError};
pub use upload_queue::{
    BillSubmission, ConnectivityProvider, Fingerprint, ItemStatus, QueueStatus, QueuedItem,
    Submission, SyncResult, UploadGateway, UploadQueue, UploadReceipt,
};
