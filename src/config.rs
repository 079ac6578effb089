use crate::error::{ErrorContext, QueueError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DUPLICATE_WINDOW_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_STORAGE_NAMESPACE: &str = "@offline_queue";
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Queue engine configuration supplied at construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    #[serde(rename = "maxQueueSize")]
    pub max_queue_size: usize,
    #[serde(rename = "maxRetries")]
    pub max_retries: u32,
    #[serde(rename = "batchSize")]
    pub batch_size: usize,
    #[serde(rename = "uploadTimeoutMs")]
    pub upload_timeout_ms: u64,
    #[serde(rename = "autoSync")]
    pub auto_sync: bool,
    #[serde(rename = "duplicateWindowMs")]
    pub duplicate_window_ms: u64,
    pub backoff: BackoffConfig,
    #[serde(rename = "storageNamespace")]
    pub storage_namespace: String,
    #[serde(rename = "eventCapacity")]
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            batch_size: DEFAULT_BATCH_SIZE,
            upload_timeout_ms: DEFAULT_UPLOAD_TIMEOUT_MS,
            auto_sync: true,
            duplicate_window_ms: DEFAULT_DUPLICATE_WINDOW_MS,
            backoff: BackoffConfig::default(),
            storage_namespace: DEFAULT_STORAGE_NAMESPACE.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl QueueConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn duplicate_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.duplicate_window_ms as i64)
    }

    /// Storage key holding the serialized item list
    pub fn queue_key(&self) -> String {
        format!("{}/bills", self.storage_namespace)
    }

    /// Storage key holding the last completed sync timestamp
    pub fn last_sync_key(&self) -> String {
        format!("{}/last_sync", self.storage_namespace)
    }

    /// Reject option combinations the engine cannot honor.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_queue_size == 0 {
            return Err(QueueError::Config("maxQueueSize must be greater than 0".into()));
        }
        if self.max_retries == 0 {
            return Err(QueueError::Config("maxRetries must be greater than 0".into()));
        }
        if self.batch_size == 0 {
            return Err(QueueError::Config("batchSize must be greater than 0".into()));
        }
        if self.upload_timeout_ms == 0 {
            return Err(QueueError::Config("uploadTimeoutMs must be greater than 0".into()));
        }
        if self.event_capacity == 0 {
            return Err(QueueError::Config("eventCapacity must be greater than 0".into()));
        }
        if self.storage_namespace.trim().is_empty() {
            return Err(QueueError::Config("storageNamespace must not be empty".into()));
        }
        self.backoff.validate()
    }
}

/// Exponential backoff gate applied between attempts on the same item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(rename = "baseDelayMs")]
    pub base_delay_ms: u64,
    pub multiplier: f64,
    #[serde(rename = "maxDelayMs")]
    pub max_delay_ms: u64,
}

/// Off unless `baseDelayMs` is set: a zero base makes every delay zero.
impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 0,
            multiplier: 2.0,
            max_delay_ms: 5 * 60 * 1000,
        }
    }
}

impl BackoffConfig {
    /// Backoff disabled: every pending item is eligible on every pass.
    pub fn none() -> Self {
        Self {
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
        }
    }

    fn validate(&self) -> Result<(), QueueError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(QueueError::Config(
                "backoff.multiplier must be a finite number >= 1.0".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(QueueError::Config(
                "backoff.maxDelayMs must be >= backoff.baseDelayMs".into(),
            ));
        }
        Ok(())
    }
}

/// Remote collector settings used by the reference HTTP gateway.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ServerConfig {
    #[serde(rename = "serverUrl")]
    pub server_url: Option<String>,
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(rename = "healthPath", default)]
    pub health_path: Option<String>,
    #[serde(default)]
    pub compress: bool,
}

pub fn get_config_dir() -> Result<PathBuf, QueueError> {
    dirs::home_dir()
        .map(|home_dir| home_dir.join(".offline-queue"))
        .ok_or_else(|| QueueError::Config("Could not find home directory".into()))
}

/// Default directory for durable queue data.
pub fn get_data_dir() -> Result<PathBuf, QueueError> {
    dirs::data_local_dir()
        .map(|dir| dir.join("offline-queue"))
        .ok_or_else(|| QueueError::Config("Could not find local data directory".into()))
}

pub fn ensure_dir(dir: &Path) -> Result<(), QueueError> {
    if !dir.exists() {
        fs::create_dir_all(dir).context("Failed to create directory")?;

        // Set permissions to 700 (read/write/execute for owner only) on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = fs::metadata(dir)?.permissions();
            permissions.set_mode(0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    Ok(())
}

/// Load a config file, choosing TOML or JSON by extension.
/// A missing file yields the default value.
pub fn load_config<T>(path: &Path) -> Result<T, QueueError>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }

    let content = fs::read_to_string(path).context("Failed to read config file")?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    if is_toml {
        toml::from_str(&content)
            .map_err(|e| QueueError::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
    } else {
        serde_json::from_str(&content)
            .map_err(|e| QueueError::Config(format!("Invalid JSON in {}: {}", path.display(), e)))
    }
}

/// Load and validate the queue configuration.
pub fn load_queue_config(path: &Path) -> Result<QueueConfig, QueueError> {
    let config: QueueConfig = load_config(path)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config<T: Serialize>(path: &Path, config: &T) -> Result<(), QueueError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content).context("Failed to write config file")?;

    // Set permissions to 600 (read/write for owner only) on Unix systems
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = QueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_key(), "@offline_queue/bills");
        assert_eq!(config.last_sync_key(), "@offline_queue/last_sync");
    }

    #[test]
    fn test_default_backoff_is_disabled() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.base_delay_ms, 0);
        assert!(backoff.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let config = QueueConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(QueueError::Config(_))));
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let config = QueueConfig {
            backoff: BackoffConfig {
                base_delay_ms: 10,
                multiplier: 0.5,
                max_delay_ms: 100,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config: QueueConfig = load_config(&dir.path().join("missing.json")).unwrap();
        assert_eq!(config, QueueConfig::default());
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(&path, r#"{"maxRetries": 5, "autoSync": false}"#).unwrap();

        let config = load_queue_config(&path).unwrap();
        assert_eq!(config.max_retries, 5);
        assert!(!config.auto_sync);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_load_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.toml");
        fs::write(
            &path,
            "batchSize = 2\nuploadTimeoutMs = 500\n\n[backoff]\nbaseDelayMs = 0\nmultiplier = 1.0\nmaxDelayMs = 0\n",
        )
        .unwrap();

        let config = load_queue_config(&path).unwrap();
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.upload_timeout(), Duration::from_millis(500));
        assert_eq!(config.backoff, BackoffConfig::none());
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(&path, "{not json").unwrap();

        let result: Result<QueueConfig, _> = load_config(&path);
        assert!(matches!(result, Err(QueueError::Config(_))));
    }

    #[test]
    fn test_save_and_reload_server_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("server.json");
        let config = ServerConfig {
            server_url: Some("https://collector.example.com".into()),
            api_key: Some("secret".into()),
            health_path: None,
            compress: true,
        };

        save_config(&path, &config).unwrap();
        let loaded: ServerConfig = load_config(&path).unwrap();
        assert_eq!(loaded, config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
