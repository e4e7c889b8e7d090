//! Storage backends
//!
//! [`MemoryStorage`] backs tests and short-lived sessions, [`FileStorage`]
//! keeps all keys in a single JSON document on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::StorageError;
use crate::traits::Storage;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// In-memory storage
pub struct MemoryStorage {
    values: DashMap<String, String>,
    changes: broadcast::Sender<String>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: DashMap::new(),
            changes,
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn store(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value.to_string());
        let _ = self.changes.send(key.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if self.values.remove(key).is_some() {
            let _ = self.changes.send(key.to_string());
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

/// JSON file storage
///
/// Every write rewrites the whole document; the store is small (one entry
/// per remote authority and workspace).
pub struct FileStorage {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
    changes: broadcast::Sender<String>,
}

impl FileStorage {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        debug!("Opened storage {:?} with {} keys", path, values.len());

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            path,
            values: Mutex::new(values),
            changes,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored keys
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn write(&self, values: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(values)?;

        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: self.path.clone(),
                source,
            })?;
        }

        std::fs::write(&self.path, content).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // Mutations are single inserts or removes, so a poisoned map is still consistent
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn store(&self, key: &str, value: &str) -> Result<(), StorageError> {
        {
            let mut values = self.lock();
            values.insert(key.to_string(), value.to_string());
            self.write(&values)?;
        }
        let _ = self.changes.send(key.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        {
            let mut values = self.lock();
            if values.remove(key).is_none() {
                return Ok(());
            }
            self.write(&values)?;
        }
        let _ = self.changes.send(key.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert!(storage.get("a").is_none());

        storage.store("a", "1").unwrap();
        assert_eq!(storage.get("a").as_deref(), Some("1"));
        assert_eq!(storage.len(), 1);

        storage.remove("a").unwrap();
        assert!(storage.is_empty());
        storage.remove("a").unwrap();
    }

    #[tokio::test]
    async fn test_memory_storage_notifies_changes() {
        let storage = MemoryStorage::new();
        let mut rx = storage.subscribe();

        storage.store("remote.tunnels.toRestore", "[]").unwrap();
        assert_eq!(rx.recv().await.unwrap(), "remote.tunnels.toRestore");
    }

    #[test]
    fn test_file_storage_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("tunnels.json");

        let storage = FileStorage::open(&path).unwrap();
        storage.store("k1", "v1").unwrap();
        storage.store("k2", "v2").unwrap();
        storage.remove("k1").unwrap();
        drop(storage);

        let reopened = FileStorage::open(&path).unwrap();
        assert!(reopened.get("k1").is_none());
        assert_eq!(reopened.get("k2").as_deref(), Some("v2"));
        assert_eq!(reopened.keys(), vec!["k2".to_string()]);
    }

    #[test]
    fn test_file_storage_rejects_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunnels.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(FileStorage::open(&path), Err(StorageError::Json(_))));
    }
}
