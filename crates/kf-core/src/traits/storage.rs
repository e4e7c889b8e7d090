//! Key-value storage trait

use tokio::sync::broadcast;

use crate::error::StorageError;

/// Scoped string storage with change notifications
pub trait Storage: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`
    fn store(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Subscribe to the keys of changed values
    fn subscribe(&self) -> broadcast::Receiver<String>;
}
