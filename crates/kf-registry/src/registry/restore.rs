//! Persisting and restoring forwarded ports

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use kf_core::address::{equivalent_key_or_all_interfaces, map_has_address};

use super::TunnelRegistry;
use crate::events::TunnelEvent;
use crate::persistence::{self, RestoreAction, TUNNELS_TO_RESTORE};

impl TunnelRegistry {
    /// Request a store of the forwarded set
    ///
    /// Requests inside the debounce window collapse into one write that
    /// happens once the window has passed without new requests.
    pub(super) async fn schedule_store(&self) {
        let window = self.inner.config.persistence().debounce;
        if self.inner.debouncer.touch(window).await {
            let registry = self.clone();
            tokio::spawn(async move {
                registry.inner.debouncer.wait_quiet().await;
                registry.flush_store().await;
            });
        }
    }

    /// Write the forwarded set to storage now
    ///
    /// Skipped when persistence is disabled, when the serialized value
    /// matches the last known one, or when there is no workspace to scope
    /// the key to.
    pub async fn flush_store(&self) {
        if !self.inner.config.restore_forwarded_ports() {
            return;
        }

        let value = {
            let state = self.inner.state.read().await;
            match persistence::serialize_tunnels(&state.forwarded) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Failed to serialize forwarded ports: {}", e);
                    return;
                }
            }
        };

        let mut known = self.inner.known_restore_value.lock().await;
        if known.as_deref() == Some(value.as_str()) {
            trace!("Forwarded ports unchanged, skipping store");
            return;
        }

        let Some(key) = &self.inner.storage_key else {
            debug!("No workspace identity, forwarded ports are not persisted");
            return;
        };
        // A failed write leaves the last known value alone so the next flush retries
        match self.inner.storage.store(key, &value) {
            Ok(()) => {
                debug!("Stored forwarded ports under {}", key);
                *known = Some(value);
            }
            Err(e) => warn!("Failed to store forwarded ports: {}", e),
        }
    }

    /// Restore forwarded ports saved by a previous session
    ///
    /// Runs once at startup after storage is available. Completing it
    /// releases any `forward` calls waiting on the restore.
    pub async fn restore_forwarded(&self) {
        if self.inner.config.restore_forwarded_ports() {
            match self.tunnel_restore_value().await {
                Some(value) => self.restore_from(&value).await,
                None => debug!("No forwarded ports to restore"),
            }
        }

        self.inner.restore_complete.send_replace(true);
    }

    /// Whether the initial restore has completed
    pub fn restore_complete(&self) -> bool {
        *self.inner.restore_complete.borrow()
    }

    async fn restore_from(&self, value: &str) {
        {
            let known = self.inner.known_restore_value.lock().await;
            if known.as_deref() == Some(value) {
                return;
            }
        }

        let tunnels = persistence::parse_tunnels(value);
        trace!(
            "Restoring ports {:?}",
            tunnels.iter().map(|t| t.remote_port).collect::<Vec<_>>()
        );

        for tunnel in tunnels {
            let already_detected = {
                let state = self.inner.state.read().await;
                map_has_address(&state.detected, &tunnel.remote_host, tunnel.remote_port).is_some()
            };

            match persistence::restore_action(&tunnel, already_detected) {
                RestoreAction::Forward(properties) => {
                    if let Err(e) = self.do_forward(properties, None).await {
                        warn!("Failed to restore forwarded port {}: {}", tunnel.key(), e);
                    }
                }
                RestoreAction::Patch { name: Some(name) } => {
                    let renamed = {
                        let mut state = self.inner.state.write().await;
                        match equivalent_key_or_all_interfaces(
                            &state.detected,
                            &tunnel.remote_host,
                            tunnel.remote_port,
                        )
                        .and_then(|key| state.detected.get_mut(&key))
                        {
                            Some(detected) => {
                                detected.name = Some(name);
                                Some(detected.remote())
                            }
                            None => None,
                        }
                    };
                    if let Some(address) = renamed {
                        self.inner.events.emit(TunnelEvent::Renamed(address));
                    }
                }
                RestoreAction::Patch { name: None } | RestoreAction::Skip => {}
                RestoreAction::Defer => {
                    debug!("Deferring extension tunnel {}", tunnel.key());
                    self.inner
                        .state
                        .write()
                        .await
                        .unrestored_extension_tunnels
                        .insert(tunnel.key(), tunnel);
                }
            }
        }
    }

    /// Read the stored value, migrating the legacy un-namespaced key
    async fn tunnel_restore_value(&self) -> Option<String> {
        let key = self.inner.storage_key.as_deref()?;

        if let Some(legacy) = self.inner.storage.get(TUNNELS_TO_RESTORE) {
            info!("Migrating forwarded ports from {} to {}", TUNNELS_TO_RESTORE, key);
            if let Err(e) = self.inner.storage.remove(TUNNELS_TO_RESTORE) {
                warn!("Failed to remove legacy forwarded ports record: {}", e);
            }
            if let Err(e) = self.inner.storage.store(key, &legacy) {
                warn!("Failed to migrate forwarded ports record: {}", e);
            }
            return Some(legacy);
        }

        self.inner.storage.get(key)
    }

    /// React to an external change of a storage key
    ///
    /// A change to this registry's key (for example one synced in after
    /// startup) triggers another restore pass.
    pub async fn handle_storage_changed(&self, key: &str) {
        if self.inner.storage_key.as_deref() != Some(key) {
            return;
        }
        if !self.inner.config.restore_forwarded_ports() {
            return;
        }
        if let Some(value) = self.inner.storage.get(key) {
            debug!("Stored forwarded ports changed, restoring");
            self.restore_from(&value).await;
        }
    }

    /// Follow storage change notifications until the storage goes away
    pub fn spawn_storage_listener(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let mut changes = registry.inner.storage.subscribe();

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(key) => registry.handle_storage_changed(&key).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Storage listener lagged, {} changes skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
