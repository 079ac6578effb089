//! Synchronization pass orchestration.
//!
//! A pass selects backoff-eligible pending items, uploads them in consecutive
//! batches (concurrently inside a batch, each raced against the upload
//! timeout) and folds the outcomes back into the store. Only one pass runs at
//! a time.

use super::gateway::{ConnectivityProvider, UploadGateway, UploadReceipt};
use super::retry::RetryStrategy;
use super::store::QueuedItemStore;
use super::types::{ItemStatus, SyncFailure, SyncResult};
use crate::config::QueueConfig;
use crate::error::{QueueError, UploadError};
use crate::events::{EventBus, QueueEventPayload};
use crate::logging::{log_debug, log_error, log_info, log_warn};
use crate::shutdown::ShutdownCoordinator;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub type SharedStore = Arc<Mutex<QueuedItemStore>>;

pub(crate) fn lock_store(store: &SharedStore) -> Result<MutexGuard<'_, QueuedItemStore>, QueueError> {
    store
        .lock()
        .map_err(|e| QueueError::LockPoisoned(format!("queue store: {}", e)))
}

/// Runs synchronization passes against the shared store
#[derive(Clone)]
pub struct SyncCoordinator {
    store: SharedStore,
    gateway: Arc<dyn UploadGateway>,
    connectivity: Arc<dyn ConnectivityProvider>,
    retry: RetryStrategy,
    batch_size: usize,
    upload_timeout: Duration,
    pass_lock: Arc<AsyncMutex<()>>,
    events: EventBus,
    shutdown: ShutdownCoordinator,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("retry", &self.retry)
            .field("batch_size", &self.batch_size)
            .field("upload_timeout", &self.upload_timeout)
            .field("syncing", &self.is_syncing())
            .finish()
    }
}

impl SyncCoordinator {
    pub fn new(
        store: SharedStore,
        gateway: Arc<dyn UploadGateway>,
        connectivity: Arc<dyn ConnectivityProvider>,
        config: &QueueConfig,
        events: EventBus,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            store,
            gateway,
            connectivity,
            retry: RetryStrategy::from_config(config),
            batch_size: config.batch_size.max(1),
            upload_timeout: config.upload_timeout(),
            pass_lock: Arc::new(AsyncMutex::new(())),
            events,
            shutdown,
        }
    }

    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry
    }

    /// Whether a pass currently holds the exclusivity guard
    pub fn is_syncing(&self) -> bool {
        self.pass_lock.try_lock().is_err()
    }

    /// Wait for an in-flight pass (if any) to finish
    pub async fn wait_idle(&self) {
        let _idle = self.pass_lock.lock().await;
    }

    fn acquire_pass(&self) -> Result<OwnedMutexGuard<()>, QueueError> {
        self.pass_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| QueueError::SyncInProgress)
    }

    /// Run one synchronization pass.
    ///
    /// Fails only on the pass-level preconditions (`SyncInProgress`,
    /// `Offline`) or a poisoned store lock. Per-item failures are reported in
    /// the returned [`SyncResult`].
    ///
    /// The pass runs in its own task. Dropping the returned future detaches
    /// from the pass without cancelling it, so items marked `uploading` always
    /// reach an outcome.
    pub async fn synchronize(&self) -> Result<SyncResult, QueueError> {
        let pass_guard = self.acquire_pass()?;
        let coordinator = self.clone();

        tokio::spawn(async move { coordinator.run_pass(pass_guard).await })
            .await
            .map_err(|e| QueueError::TaskFailed(e.to_string()))?
    }

    async fn run_pass(&self, pass_guard: OwnedMutexGuard<()>) -> Result<SyncResult, QueueError> {
        if !self.connectivity.is_connected().await {
            log_debug("upload-queue", "📴 Offline, skipping sync pass");
            return Err(QueueError::Offline);
        }

        let (selected, skipped) = self.select_eligible(Utc::now())?;
        let mut result = SyncResult {
            skipped,
            ..Default::default()
        };

        if !selected.is_empty() || skipped > 0 {
            log_info(
                "upload-queue",
                &format!(
                    "🔄 Sync pass started: {} eligible, {} waiting on backoff",
                    selected.len(),
                    skipped
                ),
            );
        }

        for batch in selected.chunks(self.batch_size) {
            let in_flight = self.begin_batch(batch, Utc::now())?;
            if in_flight.is_empty() {
                continue;
            }

            let outcomes = join_all(
                in_flight
                    .into_iter()
                    .map(|(id, payload)| self.attempt_upload(id, payload)),
            )
            .await;

            self.apply_outcomes(outcomes, &mut result)?;
        }

        self.finalize(&result)?;
        drop(pass_guard);

        self.events.publish(QueueEventPayload::Synced {
            result: result.clone(),
        });

        Ok(result)
    }

    /// Run a pass on `runtime` in the background, logging instead of
    /// returning the outcome.
    ///
    /// Usable from threads outside the runtime. A pass that gets the guard
    /// after shutdown was requested does nothing.
    pub fn spawn_pass(&self, runtime: &Handle, trigger: &'static str) -> JoinHandle<()> {
        let coordinator = self.clone();
        runtime.spawn(async move {
            let outcome = match coordinator.acquire_pass() {
                Ok(_pass_guard) if coordinator.shutdown.is_shutdown() => {
                    log_debug(
                        "upload-queue",
                        &format!("Background sync ({}) dropped: shutting down", trigger),
                    );
                    return;
                }
                Ok(pass_guard) => coordinator.run_pass(pass_guard).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(result) => log_debug(
                    "upload-queue",
                    &format!(
                        "Background sync ({}) finished: {} ok, {} failed",
                        trigger, result.successful, result.failed
                    ),
                ),
                Err(e) if e.is_precondition() => log_debug(
                    "upload-queue",
                    &format!("Background sync ({}) not run: {}", trigger, e),
                ),
                Err(e) => log_warn(
                    "upload-queue",
                    &format!("Background sync ({}) failed: {}", trigger, e),
                ),
            }
        })
    }

    /// Ids of eligible pending items in queue order, plus the count held back
    /// by backoff
    fn select_eligible(&self, now: DateTime<Utc>) -> Result<(Vec<String>, usize), QueueError> {
        let store = lock_store(&self.store)?;
        let mut selected = Vec::new();
        let mut skipped = 0;

        for item in store.iter().filter(|item| item.status == ItemStatus::Pending) {
            if self.retry.is_eligible(item, now) {
                selected.push(item.id.clone());
            } else {
                skipped += 1;
            }
        }

        Ok((selected, skipped))
    }

    /// Mark a batch as uploading and snapshot the payloads to send.
    ///
    /// Items removed or changed since selection are dropped from the batch.
    fn begin_batch(
        &self,
        ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, Value)>, QueueError> {
        let mut store = lock_store(&self.store)?;
        let mut in_flight = Vec::with_capacity(ids.len());

        for id in ids {
            if let Some(item) = store.get_mut(id) {
                if item.status != ItemStatus::Pending {
                    continue;
                }
                item.status = ItemStatus::Uploading;
                item.last_attempt_at = Some(now);
                in_flight.push((item.id.clone(), item.payload.clone()));
            }
        }

        // Best effort: recovery on load resets anything left in `uploading`
        if let Err(e) = store.persist() {
            log_warn(
                "upload-queue",
                &format!("⚠ Failed to persist batch start: {}", e),
            );
        }

        Ok(in_flight)
    }

    async fn attempt_upload(
        &self,
        id: String,
        payload: Value,
    ) -> (String, Result<UploadReceipt, UploadError>) {
        let outcome = match timeout(self.upload_timeout, self.gateway.upload(&id, &payload)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(UploadError::Timeout(self.upload_timeout.as_millis() as u64)),
        };
        (id, outcome)
    }

    fn apply_outcomes(
        &self,
        outcomes: Vec<(String, Result<UploadReceipt, UploadError>)>,
        result: &mut SyncResult,
    ) -> Result<(), QueueError> {
        let mut store = lock_store(&self.store)?;

        for (id, outcome) in outcomes {
            let item = match store.get_mut(&id) {
                Some(item) if item.status == ItemStatus::Uploading => item,
                _ => {
                    log_debug(
                        "upload-queue",
                        &format!("Ignoring upload outcome for {} (removed or reset)", id),
                    );
                    continue;
                }
            };

            match outcome {
                Ok(receipt) => {
                    item.status = ItemStatus::Success;
                    item.last_error = None;
                    item.remote_id = Some(receipt.remote_id);
                    item.synced_at = Some(Utc::now());
                    result.successful += 1;
                    log_info("upload-queue", &format!("✅ Uploaded {}", id));
                }
                Err(e) => {
                    let message = e.to_string();
                    let status = self.retry.record_failure(item, message.clone());
                    if status == ItemStatus::Failed {
                        log_error(
                            "upload-queue",
                            &format!(
                                "❌ {} permanently failed after {} attempts: {}",
                                id, item.attempt, message
                            ),
                        );
                    } else {
                        log_warn(
                            "upload-queue",
                            &format!(
                                "⚠ Upload failed for {} (attempt {}/{}): {}",
                                id, item.attempt, self.retry.max_retries, message
                            ),
                        );
                    }
                    result.failed += 1;
                    result.errors.push(SyncFailure { id, error: message });
                }
            }
        }

        if let Err(e) = store.persist() {
            log_warn(
                "upload-queue",
                &format!("⚠ Failed to persist batch outcomes: {}", e),
            );
        }

        Ok(())
    }

    fn finalize(&self, result: &SyncResult) -> Result<(), QueueError> {
        let mut store = lock_store(&self.store)?;

        if let Err(e) = store.persist() {
            log_error(
                "upload-queue",
                &format!("Failed to persist queue after sync: {}", e),
            );
        }
        if let Err(e) = store.record_sync(Utc::now()) {
            log_error(
                "upload-queue",
                &format!("Failed to record last sync time: {}", e),
            );
        }

        if result.attempted() > 0 {
            log_info(
                "upload-queue",
                &format!(
                    "📊 Sync pass complete: {} uploaded, {} failed, {} deferred",
                    result.successful, result.failed, result.skipped
                ),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use crate::storage::MemoryStore;
    use crate::upload_queue::gateway::ManualConnectivity;
    use crate::upload_queue::types::{Fingerprint, QueuedItem, Submission};
    use async_trait::async_trait;
    use serde_json::json;

    /// Fails items whose payload carries `"fail": true`
    struct SelectiveGateway;

    #[async_trait]
    impl UploadGateway for SelectiveGateway {
        async fn upload(&self, id: &str, payload: &Value) -> Result<UploadReceipt, UploadError> {
            if payload["fail"] == json!(true) {
                Err(UploadError::Failed("Server rejected bill".into()))
            } else {
                Ok(UploadReceipt {
                    remote_id: format!("remote-{}", id),
                })
            }
        }
    }

    /// Removes the item from the store while its upload is in flight
    struct RemovingGateway {
        store: SharedStore,
    }

    #[async_trait]
    impl UploadGateway for RemovingGateway {
        async fn upload(&self, id: &str, _payload: &Value) -> Result<UploadReceipt, UploadError> {
            self.store.lock().unwrap().remove(id).unwrap();
            Ok(UploadReceipt {
                remote_id: "gone".into(),
            })
        }
    }

    fn config() -> QueueConfig {
        QueueConfig {
            auto_sync: false,
            backoff: BackoffConfig::none(),
            ..Default::default()
        }
    }

    fn shared_store(config: &QueueConfig) -> SharedStore {
        Arc::new(Mutex::new(QueuedItemStore::new(
            Arc::new(MemoryStore::new()),
            config,
        )))
    }

    fn enqueue(store: &SharedStore, store_id: &str, payload: Value) -> String {
        let item = QueuedItem::new(
            Submission::new(
                payload,
                Fingerprint {
                    store_id: store_id.into(),
                    amount_minor: 100,
                    image_ref: format!("img://{}", store_id),
                    image_hash: None,
                },
            ),
            Utc::now(),
        );
        let id = item.id.clone();
        store.lock().unwrap().append(item).unwrap();
        id
    }

    struct SlowGateway;

    #[async_trait]
    impl UploadGateway for SlowGateway {
        async fn upload(&self, id: &str, _payload: &Value) -> Result<UploadReceipt, UploadError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(UploadReceipt {
                remote_id: id.to_string(),
            })
        }
    }

    fn coordinator(store: &SharedStore, gateway: Arc<dyn UploadGateway>) -> SyncCoordinator {
        SyncCoordinator::new(
            store.clone(),
            gateway,
            Arc::new(ManualConnectivity::new(true)),
            &config(),
            EventBus::new(16),
            ShutdownCoordinator::new(),
        )
    }

    #[tokio::test]
    async fn test_mixed_outcomes_update_items() {
        let cfg = config();
        let store = shared_store(&cfg);
        let ok = enqueue(&store, "a", json!({"fail": false}));
        let bad = enqueue(&store, "b", json!({"fail": true}));

        let result = coordinator(&store, Arc::new(SelectiveGateway))
            .synchronize()
            .await
            .unwrap();

        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors[0].id, bad);
        assert_eq!(result.errors[0].error, "Server rejected bill");

        let guard = store.lock().unwrap();
        let uploaded = guard.get(&ok).unwrap();
        assert_eq!(uploaded.status, ItemStatus::Success);
        assert_eq!(uploaded.remote_id.as_deref(), Some(format!("remote-{}", ok).as_str()));
        assert!(uploaded.synced_at.is_some());

        let retried = guard.get(&bad).unwrap();
        assert_eq!(retried.status, ItemStatus::Pending);
        assert_eq!(retried.attempt, 1);
        assert!(retried.last_attempt_at.is_some());
        assert!(guard.last_sync().is_some());
    }

    #[tokio::test]
    async fn test_outcome_for_removed_item_is_ignored() {
        let cfg = config();
        let store = shared_store(&cfg);
        enqueue(&store, "a", json!({}));

        let gateway = Arc::new(RemovingGateway {
            store: store.clone(),
        });
        let result = coordinator(&store, gateway).synchronize().await.unwrap();

        assert_eq!(result.successful, 0);
        assert_eq!(result.failed, 0);
        assert!(store.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backoff_ineligible_items_are_skipped() {
        let cfg = config();
        let store = shared_store(&cfg);
        let id = enqueue(&store, "a", json!({}));
        {
            let mut guard = store.lock().unwrap();
            let item = guard.get_mut(&id).unwrap();
            item.attempt = 1;
            item.last_attempt_at = Some(Utc::now());
        }

        let coordinator = SyncCoordinator::new(
            store.clone(),
            Arc::new(SelectiveGateway),
            Arc::new(ManualConnectivity::new(true)),
            &QueueConfig {
                backoff: BackoffConfig {
                    base_delay_ms: 60_000,
                    multiplier: 2.0,
                    max_delay_ms: 600_000,
                },
                ..config()
            },
            EventBus::new(16),
            ShutdownCoordinator::new(),
        );

        let result = coordinator.synchronize().await.unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.attempted(), 0);
        assert_eq!(store.lock().unwrap().get(&id).unwrap().status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_pass_publishes_synced_event() {
        let cfg = config();
        let store = shared_store(&cfg);
        enqueue(&store, "a", json!({}));

        let coordinator = coordinator(&store, Arc::new(SelectiveGateway));
        let mut rx = coordinator.events.subscribe();

        coordinator.synchronize().await.unwrap();
        assert!(!coordinator.is_syncing());

        let event = rx.recv().await.unwrap();
        match event.payload {
            QueueEventPayload::Synced { result } => assert_eq!(result.successful, 1),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_background_pass_skipped_after_shutdown() {
        let cfg = config();
        let store = shared_store(&cfg);
        let id = enqueue(&store, "a", json!({}));

        let shutdown = ShutdownCoordinator::new();
        let coordinator = SyncCoordinator::new(
            store.clone(),
            Arc::new(SelectiveGateway),
            Arc::new(ManualConnectivity::new(true)),
            &cfg,
            EventBus::new(16),
            shutdown.clone(),
        );

        shutdown.shutdown();
        coordinator
            .spawn_pass(&Handle::current(), "test")
            .await
            .unwrap();

        let guard = store.lock().unwrap();
        assert_eq!(guard.get(&id).unwrap().status, ItemStatus::Pending);
        assert!(guard.last_sync().is_none());
    }

    #[tokio::test]
    async fn test_abandoned_pass_still_completes() {
        let cfg = config();
        let store = shared_store(&cfg);
        let id = enqueue(&store, "a", json!({}));

        let coordinator = coordinator(&store, Arc::new(SlowGateway));
        let abandoned = timeout(Duration::from_millis(10), coordinator.synchronize()).await;
        assert!(abandoned.is_err());

        coordinator.wait_idle().await;
        assert_eq!(store.lock().unwrap().get(&id).unwrap().status, ItemStatus::Success);
    }
}
