use super::KeyValueStore;
use crate::config::ensure_dir;
use crate::error::{ErrorContext, QueueError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// One file per key inside a directory.
///
/// File names are the URL-encoded key, so namespaced keys such as
/// `@offline_queue/bills` map to a single flat file. Writes go through a
/// temp file and an atomic rename while holding an exclusive lock.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }

    fn lock_file(&self) -> Result<File, QueueError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(".lock"))
            .context("Failed to open store lock file")?;

        // Exclusive lock (blocks until available)
        file.lock_exclusive()
            .context("Failed to lock store directory")?;
        Ok(file)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, QueueError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(QueueError::Storage(format!(
                "Failed to read key '{}': {}",
                key, e
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), QueueError> {
        let lock = self.lock_file()?;
        let path = self.path_for(key);
        let temp_path = path.with_extension("json.tmp");

        {
            let mut temp_file = File::create(&temp_path).context("Failed to create temp file")?;
            temp_file
                .write_all(value.as_bytes())
                .context("Failed to write temp file")?;
            // Sync to disk before the rename makes it visible
            temp_file.sync_all().context("Failed to sync temp file")?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = fs::metadata(&temp_path)?.permissions();
            permissions.set_mode(0o600);
            fs::set_permissions(&temp_path, permissions)?;
        }

        fs::rename(&temp_path, &path).context("Failed to replace stored value")?;

        lock.unlock().context("Failed to unlock store directory")?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), QueueError> {
        let lock = self.lock_file()?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(QueueError::Storage(format!(
                    "Failed to remove key '{}': {}",
                    key, e
                )))
            }
        }
        lock.unlock().context("Failed to unlock store directory")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_set_get_remove() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("store")).unwrap();

        assert_eq!(store.get("@offline_queue/bills").unwrap(), None);

        store.set("@offline_queue/bills", "[]").unwrap();
        assert_eq!(
            store.get("@offline_queue/bills").unwrap(),
            Some("[]".to_string())
        );

        store.set("@offline_queue/bills", "[1]").unwrap();
        assert_eq!(
            store.get("@offline_queue/bills").unwrap(),
            Some("[1]".to_string())
        );

        store.remove("@offline_queue/bills").unwrap();
        assert_eq!(store.get("@offline_queue/bills").unwrap(), None);

        // Removing twice is fine
        store.remove("@offline_queue/bills").unwrap();
    }

    #[test]
    fn test_keys_map_to_flat_files() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();

        store.set("@offline_queue/last_sync", "2025-01-01T00:00:00Z").unwrap();

        let expected = dir.path().join("%40offline_queue%2Flast_sync.json");
        assert!(expected.exists());
        assert!(!dir.path().join("%40offline_queue%2Flast_sync.json.tmp").exists());
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = JsonFileStore::open(dir.path()).unwrap();
            store.set("k", "persisted").unwrap();
        }

        let reopened = JsonFileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("k").unwrap(), Some("persisted".to_string()));
    }
}
