//! Offline-first upload queue for captured bills.
//!
//! [`UploadQueue`] is the single entry point: it accepts submissions, keeps
//! them durable across restarts, suppresses duplicates and runs
//! synchronization passes against an [`UploadGateway`] when the device is
//! online.

mod compression;
mod duplicate;
mod gateway;
mod hashing;
mod processor;
mod retry;
mod store;
mod types;
mod validation;

pub use compression::compress_body;
pub use duplicate::DuplicateDetector;
pub use gateway::{
    ConnectivityProvider, HttpConnectivityProbe, HttpUploadGateway, ManualConnectivity,
    UploadGateway, UploadReceipt,
};
pub use hashing::{calculate_content_hash_sha256, calculate_file_hash_sha256};
pub use processor::{SharedStore, SyncCoordinator};
pub use retry::RetryStrategy;
pub use store::QueuedItemStore;
pub use types::*;
pub use validation::{validate_bill, validate_fingerprint, validate_submission, MAX_PAYLOAD_BYTES};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::events::{
    AutoSyncHandler, ChangeKind, EventBus, EventLogHandler, EventReceiver, QueueEvent,
    QueueEventPayload, SubscriptionId,
};
use crate::logging::{log_info, log_warn};
use crate::shutdown::ShutdownCoordinator;
use crate::storage::KeyValueStore;
use chrono::Utc;
use processor::lock_store;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct UploadQueue {
    config: Arc<QueueConfig>,
    store: SharedStore,
    duplicates: DuplicateDetector,
    coordinator: SyncCoordinator,
    events: EventBus,
    shutdown: ShutdownCoordinator,
    initialized: Arc<AtomicBool>,
    handler_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    runtime: Arc<Mutex<Option<Handle>>>,
}

impl std::fmt::Debug for UploadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadQueue")
            .field("config", &self.config)
            .field("store", &"<queued items>")
            .field("coordinator", &self.coordinator)
            .field("events", &self.events)
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl UploadQueue {
    pub fn new(
        config: QueueConfig,
        storage: Arc<dyn KeyValueStore>,
        gateway: Arc<dyn UploadGateway>,
        connectivity: Arc<dyn ConnectivityProvider>,
    ) -> Result<Self, QueueError> {
        config.validate()?;

        let events = EventBus::new(config.event_capacity);
        let store: SharedStore = Arc::new(Mutex::new(QueuedItemStore::new(storage, &config)));
        let shutdown = ShutdownCoordinator::new();
        let coordinator = SyncCoordinator::new(
            store.clone(),
            gateway,
            connectivity,
            &config,
            events.clone(),
            shutdown.clone(),
        );

        Ok(Self {
            duplicates: DuplicateDetector::new(config.duplicate_window()),
            config: Arc::new(config),
            store,
            coordinator,
            events,
            shutdown,
            initialized: Arc::new(AtomicBool::new(false)),
            handler_tasks: Arc::new(Mutex::new(Vec::new())),
            runtime: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Load persisted state and start background handlers.
    ///
    /// Returns the number of items recovered from an interrupted pass.
    /// Calling this on an initialized queue is a no-op.
    pub async fn initialize(&self) -> Result<usize, QueueError> {
        if self.is_initialized() {
            return Ok(0);
        }

        let (recovered, has_pending) = {
            let mut store = lock_store(&self.store)?;
            let recovered = store.load();
            if recovered > 0 {
                if let Err(e) = store.persist() {
                    log_warn(
                        "upload-queue",
                        &format!("⚠ Failed to persist recovered items: {}", e),
                    );
                }
            }
            let has_pending = store.iter().any(|item| item.status == ItemStatus::Pending);
            (recovered, has_pending)
        };

        let runtime = Handle::current();
        if let Ok(mut slot) = self.runtime.lock() {
            *slot = Some(runtime.clone());
        }

        self.shutdown.reset();
        self.initialized.store(true, Ordering::SeqCst);

        let mut handlers =
            vec![EventLogHandler::new(self.events.clone(), self.shutdown.clone()).start()];
        if self.config.auto_sync {
            handlers.push(
                AutoSyncHandler::new(
                    self.events.clone(),
                    self.coordinator.clone(),
                    self.shutdown.clone(),
                )
                .start(),
            );
        }
        if let Ok(mut tasks) = self.handler_tasks.lock() {
            tasks.extend(handlers);
        }

        if self.config.auto_sync && has_pending {
            self.coordinator.spawn_pass(&runtime, "startup");
        }

        log_info("upload-queue", "🚀 Upload queue initialized");
        Ok(recovered)
    }

    /// Stop background handlers, let an in-flight pass finish and flush state.
    pub async fn destroy(&self) -> Result<(), QueueError> {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.shutdown();
        let tasks: Vec<JoinHandle<()>> = self
            .handler_tasks
            .lock()
            .map(|mut tasks| tasks.drain(..).collect())
            .unwrap_or_default();
        for task in tasks {
            let _ = task.await;
        }

        self.coordinator.wait_idle().await;
        lock_store(&self.store)?.persist()?;

        log_info("upload-queue", "🛑 Upload queue destroyed");
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<(), QueueError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(QueueError::NotInitialized)
        }
    }

    /// Enqueue a submission, returning its id.
    ///
    /// A submission equivalent to a queued item returns that item's id and
    /// leaves the queue untouched.
    pub fn add_to_queue(&self, submission: Submission) -> Result<String, QueueError> {
        self.ensure_initialized()?;
        validate_submission(&submission)?;

        let now = Utc::now();
        let id = {
            let mut store = lock_store(&self.store)?;

            if let Some(existing) =
                self.duplicates
                    .find_duplicate(&submission.fingerprint, now, store.iter())
            {
                log_info(
                    "upload-queue",
                    &format!("⏭ Duplicate submission, reusing {}", existing.id),
                );
                return Ok(existing.id.clone());
            }

            let item = QueuedItem::new(submission, now);
            let id = item.id.clone();
            store.append(item)?;
            id
        };

        log_info("upload-queue", &format!("📥 Queued {}", id));
        self.events
            .publish(QueueEventPayload::changed(ChangeKind::Added, Some(&id)));
        Ok(id)
    }

    /// Validate a bill and enqueue it
    pub fn add_bill(&self, bill: BillSubmission) -> Result<String, QueueError> {
        self.ensure_initialized()?;
        validate_bill(&bill)?;
        let submission = bill.into_submission()?;
        self.add_to_queue(submission)
    }

    pub fn remove_from_queue(&self, id: &str) -> Result<(), QueueError> {
        self.ensure_initialized()?;
        lock_store(&self.store)?.remove(id)?;

        log_info("upload-queue", &format!("🗑 Removed {}", id));
        self.events
            .publish(QueueEventPayload::changed(ChangeKind::Removed, Some(id)));
        Ok(())
    }

    /// Return every failed item to `pending`; returns how many were reset
    pub fn retry_failed(&self) -> Result<usize, QueueError> {
        self.ensure_initialized()?;
        let reset = lock_store(&self.store)?.update_where(
            |item| item.status == ItemStatus::Failed,
            QueuedItem::reset_for_retry,
        )?;

        if reset > 0 {
            log_info(
                "upload-queue",
                &format!("🔁 Reset {} failed item(s) for retry", reset),
            );
        }
        self.events
            .publish(QueueEventPayload::changed(ChangeKind::Updated, None));
        Ok(reset)
    }

    /// Reset a single item for retry; returns whether it was `failed`
    pub fn retry_item(&self, id: &str) -> Result<bool, QueueError> {
        self.ensure_initialized()?;
        let reset = {
            let mut store = lock_store(&self.store)?;
            if !store.contains(id) {
                return Err(QueueError::NotFound(id.to_string()));
            }
            store.update_where(
                |item| item.id == id && item.status == ItemStatus::Failed,
                QueuedItem::reset_for_retry,
            )?
        };

        if reset > 0 {
            self.events
                .publish(QueueEventPayload::changed(ChangeKind::Updated, Some(id)));
        }
        Ok(reset > 0)
    }

    /// Drop every successfully uploaded item; returns how many were removed
    pub fn clear_completed(&self) -> Result<usize, QueueError> {
        self.clear_where(|item| item.status != ItemStatus::Success)
    }

    pub fn clear_failed(&self) -> Result<usize, QueueError> {
        self.clear_where(|item| item.status != ItemStatus::Failed)
    }

    pub fn clear_all(&self) -> Result<usize, QueueError> {
        self.ensure_initialized()?;
        let removed = lock_store(&self.store)?.clear()?;
        self.publish_cleared(removed);
        Ok(removed)
    }

    fn clear_where<F>(&self, keep: F) -> Result<usize, QueueError>
    where
        F: FnMut(&QueuedItem) -> bool,
    {
        self.ensure_initialized()?;
        let removed = lock_store(&self.store)?.retain(keep)?;
        self.publish_cleared(removed);
        Ok(removed)
    }

    fn publish_cleared(&self, removed: usize) {
        if removed > 0 {
            log_info("upload-queue", &format!("🧹 Cleared {} item(s)", removed));
        }
        self.events
            .publish(QueueEventPayload::changed(ChangeKind::Cleared, None));
    }

    /// All items in insertion order
    pub fn get_queue(&self) -> Result<Vec<QueuedItem>, QueueError> {
        self.ensure_initialized()?;
        Ok(lock_store(&self.store)?.items())
    }

    pub fn get_bill(&self, id: &str) -> Result<Option<QueuedItem>, QueueError> {
        self.ensure_initialized()?;
        Ok(lock_store(&self.store)?.get(id).cloned())
    }

    pub fn get_status(&self) -> Result<QueueStatus, QueueError> {
        self.ensure_initialized()?;
        let store = lock_store(&self.store)?;
        Ok(QueueStatus::from_items(store.iter(), store.last_sync()))
    }

    /// Run one synchronization pass now
    pub async fn synchronize(&self) -> Result<SyncResult, QueueError> {
        self.ensure_initialized()?;
        self.coordinator.synchronize().await
    }

    pub fn is_syncing(&self) -> bool {
        self.coordinator.is_syncing()
    }

    /// Host hook for reachability changes; schedules a pass when back online.
    ///
    /// Safe to call from OS callback threads outside the async runtime: the
    /// pass runs on the runtime that called [`UploadQueue::initialize`].
    pub fn notify_connectivity_changed(&self, connected: bool) -> Option<JoinHandle<()>> {
        if !connected || !self.config.auto_sync || !self.is_initialized() {
            return None;
        }
        let runtime = self.runtime.lock().ok()?.clone()?;

        log_info("upload-queue", "📶 Connectivity restored, scheduling sync");
        Some(self.coordinator.spawn_pass(&runtime, "connectivity"))
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Register a callback listener for queue events
    pub fn on<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        self.events.on(listener)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.off(id)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
