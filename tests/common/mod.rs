#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use offline_upload_queue::storage::{KeyValueStore, MemoryStore};
use offline_upload_queue::upload_queue::ManualConnectivity;
use offline_upload_queue::{
    BackoffConfig, BillSubmission, QueueConfig, UploadError, UploadGateway, UploadQueue,
    UploadReceipt,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scriptable gateway that records every call
#[derive(Default)]
pub struct MockGateway {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub uploaded_ids: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let gateway = Self::default();
        gateway.fail.store(true, Ordering::SeqCst);
        Arc::new(gateway)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        let gateway = Self::default();
        *gateway.delay.lock().unwrap() = Some(delay);
        Arc::new(gateway)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadGateway for MockGateway {
    async fn upload(&self, id: &str, _payload: &Value) -> Result<UploadReceipt, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(UploadError::Failed("Network error".to_string()));
        }

        self.uploaded_ids.lock().unwrap().push(id.to_string());
        Ok(UploadReceipt {
            remote_id: format!("srv-{}", id),
        })
    }
}

/// Manual-sync config with backoff disabled
pub fn test_config() -> QueueConfig {
    QueueConfig {
        auto_sync: false,
        backoff: BackoffConfig::none(),
        ..Default::default()
    }
}

pub fn bill(n: u32) -> BillSubmission {
    BillSubmission::new(
        format!("store-{}", n),
        10.0 + f64::from(n),
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
        format!("file:///receipts/{}.jpg", n),
    )
}

pub struct Harness {
    pub queue: UploadQueue,
    pub gateway: Arc<MockGateway>,
    pub connectivity: ManualConnectivity,
    pub storage: MemoryStore,
}

pub async fn harness(config: QueueConfig, gateway: Arc<MockGateway>) -> Harness {
    let storage = MemoryStore::new();
    harness_with_storage(config, gateway, storage).await
}

pub async fn harness_with_storage(
    config: QueueConfig,
    gateway: Arc<MockGateway>,
    storage: MemoryStore,
) -> Harness {
    let connectivity = ManualConnectivity::new(true);
    let queue = UploadQueue::new(
        config,
        Arc::new(storage.clone()) as Arc<dyn KeyValueStore>,
        gateway.clone(),
        Arc::new(connectivity.clone()),
    )
    .unwrap();
    queue.initialize().await.unwrap();

    Harness {
        queue,
        gateway,
        connectivity,
        storage,
    }
}
