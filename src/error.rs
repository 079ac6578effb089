use thiserror::Error;

/// Offline upload queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// Add rejected because the queue is at capacity
    #[error("Queue is full (maximum {max} items)")]
    QueueFull { max: usize },

    /// Operation referenced an unknown item id
    #[error("Item not found: {0}")]
    NotFound(String),

    /// Synchronization requested while another pass is running
    #[error("Sync already in progress")]
    SyncInProgress,

    /// Synchronization requested without network connectivity
    #[error("No network connection")]
    Offline,

    /// Operation attempted before `initialize()` or after `destroy()`
    #[error("Queue not initialized")]
    NotInitialized,

    /// Submission validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Mutex poison error
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// The task running a synchronization pass panicked or was aborted
    #[error("Sync task failed: {0}")]
    TaskFailed(String),
}

impl QueueError {
    /// Whether this is one of the precondition errors that abort an operation
    /// before any mutation happens.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            QueueError::QueueFull { .. }
                | QueueError::NotFound(_)
                | QueueError::SyncInProgress
                | QueueError::Offline
        )
    }
}

/// Outcome of a single failed upload attempt.
///
/// These are recorded per item in the sync result and never surface as
/// errors from `synchronize()`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("Upload timed out after {0}ms")]
    Timeout(u64),

    #[error("{0}")]
    Failed(String),
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T, QueueError>;
}

impl<T, E: Into<QueueError>> ErrorContext<T> for Result<T, E> {
    fn context(self, msg: &str) -> Result<T, QueueError> {
        self.map_err(|e| {
            let err: QueueError = e.into();
            match err {
                QueueError::Validation(s) => QueueError::Validation(format!("{}: {}", msg, s)),
                QueueError::Config(s) => QueueError::Config(format!("{}: {}", msg, s)),
                QueueError::Storage(s) => QueueError::Storage(format!("{}: {}", msg, s)),
                QueueError::LockPoisoned(s) => {
                    QueueError::LockPoisoned(format!("{}: {}", msg, s))
                }
                QueueError::Io(e) => QueueError::Storage(format!("{}: {}", msg, e)),
                other => other,
            }
        })
    }
}
