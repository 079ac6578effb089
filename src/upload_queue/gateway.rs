//! Collaborator interfaces consumed by the sync engine, plus reference
//! implementations.
//!
//! The engine only cares whether an upload succeeded, failed, or timed out.
//! Retry policy never lives in a gateway.

use super::compression::compress_body;
use crate::config::ServerConfig;
use crate::error::{QueueError, UploadError};
use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const BILLS_ENDPOINT: &str = "api/bills";
const DEFAULT_HEALTH_PATH: &str = "health";
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Successful upload acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub remote_id: String,
}

/// Submits one queued item to the remote collector.
#[async_trait]
pub trait UploadGateway: Send + Sync {
    async fn upload(&self, id: &str, payload: &Value) -> Result<UploadReceipt, UploadError>;
}

/// Reports whether the device currently has network access.
#[async_trait]
pub trait ConnectivityProvider: Send + Sync {
    async fn is_connected(&self) -> bool;
}

/// Connectivity flag flipped by the host (OS reachability callbacks, tests)
#[derive(Debug, Clone)]
pub struct ManualConnectivity {
    connected: Arc<AtomicBool>,
}

impl ManualConnectivity {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(connected)),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ConnectivityProvider for ManualConnectivity {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Resolve `relative` against the configured server URL, keeping any path prefix
fn server_endpoint(config: &ServerConfig, relative: &str) -> Result<Url, QueueError> {
    let server_url = config
        .server_url
        .as_deref()
        .ok_or_else(|| QueueError::Config("No server URL configured".into()))?;

    let mut base = Url::parse(server_url)
        .map_err(|e| QueueError::Config(format!("Invalid server URL '{}': {}", server_url, e)))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    base.join(relative.trim_start_matches('/'))
        .map_err(|e| QueueError::Config(format!("Invalid endpoint '{}': {}", relative, e)))
}

/// POSTs `{id, payload}` JSON to `<serverUrl>/api/bills`.
#[derive(Debug, Clone)]
pub struct HttpUploadGateway {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    compress: bool,
}

impl HttpUploadGateway {
    pub fn new(config: &ServerConfig) -> Result<Self, QueueError> {
        let endpoint = server_endpoint(config, BILLS_ENDPOINT)?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("offline-upload-queue/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            compress: config.compress,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    id: Option<String>,
}

#[async_trait]
impl UploadGateway for HttpUploadGateway {
    async fn upload(&self, id: &str, payload: &Value) -> Result<UploadReceipt, UploadError> {
        let body = serde_json::to_vec(&json!({ "id": id, "payload": payload }))
            .map_err(|e| UploadError::Failed(format!("Failed to serialize payload: {}", e)))?;

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            // Every attempt for an item carries the same key
            .header("Idempotency-Key", id);

        if let Some(ref api_key) = self.api_key {
            request = request.bearer_auth(api_key);
        }

        request = if self.compress {
            let compressed = compress_body(&body).map_err(UploadError::Failed)?;
            request.header(CONTENT_ENCODING, "gzip").body(compressed)
        } else {
            request.body(body)
        };

        let response = request
            .send()
            .await
            .map_err(|e| UploadError::Failed(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(UploadError::Failed(format!(
                "Upload failed with status {}: {}",
                status, error_text
            )));
        }

        // A body without an id still counts as accepted
        let remote_id = response
            .json::<UploadResponse>()
            .await
            .ok()
            .and_then(|r| r.id)
            .unwrap_or_else(|| id.to_string());

        Ok(UploadReceipt { remote_id })
    }
}

/// Treats any HTTP response from the health endpoint as "online".
#[derive(Debug, Clone)]
pub struct HttpConnectivityProbe {
    client: reqwest::Client,
    url: Url,
}

impl HttpConnectivityProbe {
    pub fn new(config: &ServerConfig) -> Result<Self, QueueError> {
        Self::with_timeout(config, PROBE_TIMEOUT)
    }

    pub fn with_timeout(config: &ServerConfig, timeout: Duration) -> Result<Self, QueueError> {
        let health_path = config.health_path.as_deref().unwrap_or(DEFAULT_HEALTH_PATH);
        let url = server_endpoint(config, health_path)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ConnectivityProvider for HttpConnectivityProbe {
    async fn is_connected(&self) -> bool {
        self.client.get(self.url.clone()).send().await.is_ok()
    }
}
