//! Live configuration holder with change notifications

use tokio::sync::watch;

use super::{PersistenceConfig, RemoteConfig};

/// Shared, observable configuration document
///
/// Readers take cheap snapshots; writers replace or edit the document and
/// every subscriber is woken with the new value.
#[derive(Debug)]
pub struct ConfigStore {
    tx: watch::Sender<RemoteConfig>,
}

impl ConfigStore {
    /// Create a store holding `config`
    pub fn new(config: RemoteConfig) -> Self {
        let (tx, _rx) = watch::channel(config);
        Self { tx }
    }

    /// Snapshot of the current configuration
    pub fn current(&self) -> RemoteConfig {
        self.tx.borrow().clone()
    }

    /// Whether forwarded ports should be persisted and restored
    pub fn restore_forwarded_ports(&self) -> bool {
        self.tx.borrow().restore_forwarded_ports
    }

    /// Current timer settings
    pub fn persistence(&self) -> PersistenceConfig {
        self.tx.borrow().persistence.clone()
    }

    /// Replace the whole document
    pub fn replace(&self, config: RemoteConfig) {
        self.tx.send_replace(config);
    }

    /// Edit the document in place
    pub fn update(&self, edit: impl FnOnce(&mut RemoteConfig)) {
        self.tx.send_modify(edit);
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> watch::Receiver<RemoteConfig> {
        self.tx.subscribe()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(RemoteConfig::default())
    }
}
