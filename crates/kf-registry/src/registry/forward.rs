//! Forward, merge and close

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use kf_core::address::{equivalent_key_or_all_interfaces, make_address, map_has_address};
use kf_core::traits::OpenTunnelRequest;
use kf_core::{
    Attributes, OpenError, RemoteAddress, RemoteTunnel, Tunnel, TunnelCloseReason,
    TunnelProperties, TunnelSource,
};

use super::{CachedProperties, TunnelRegistry};
use crate::events::TunnelEvent;

/// Exclusive claim on opening an address
///
/// Dropping the guard removes the in-progress entry and closes its channel,
/// which wakes every caller waiting on the address.
struct InProgressGuard<'a> {
    pending: &'a DashMap<String, watch::Receiver<()>>,
    key: String,
    _done: watch::Sender<()>,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
    }
}

enum Claim<'a> {
    /// An equivalent tunnel is already forwarded
    Existing(Tunnel),
    /// The caller owns the open
    Open(InProgressGuard<'a>),
}

enum MergeAction {
    None,
    Fire,
    Reopen,
}

impl TunnelRegistry {
    /// Forward a remote port
    ///
    /// Returns the transport handle, `Ok(None)` when the transport produced
    /// no local address, or the transport's error. Forwarding an address
    /// that is already forwarded (under any equivalent host spelling) merges
    /// the request into the existing tunnel instead of opening a second one.
    ///
    /// With a remote authority set this waits for `restore_forwarded`.
    pub async fn forward(
        &self,
        properties: TunnelProperties,
        attributes: Option<Attributes>,
    ) -> Result<Option<RemoteTunnel>, OpenError> {
        if self.inner.remote_authority.is_some() {
            let mut restored = self.inner.restore_complete.subscribe();
            if !*restored.borrow() {
                debug!("Waiting for restore before forwarding {}", properties.remote);
                let _ = restored.wait_for(|done| *done).await;
            }
        }
        self.do_forward(properties, attributes).await
    }

    pub(super) fn do_forward(
        &self,
        properties: TunnelProperties,
        attributes: Option<Attributes>,
    ) -> BoxFuture<'_, Result<Option<RemoteTunnel>, OpenError>> {
        async move {
            match self.claim(&properties.remote).await {
                Claim::Existing(existing) => {
                    let attributes = match attributes {
                        Some(attributes) => Some(attributes),
                        None => self.resolve_attributes(&properties.remote).await,
                    };
                    self.merge_into_existing(existing, properties, attributes).await
                }
                Claim::Open(guard) => self.open(properties, attributes, guard).await,
            }
        }
        .boxed()
    }

    async fn claim(&self, remote: &RemoteAddress) -> Claim<'_> {
        loop {
            let mut released = {
                let state = self.inner.state.write().await;
                if let Some(existing) = map_has_address(&state.forwarded, &remote.host, remote.port) {
                    return Claim::Existing(existing.clone());
                }

                let pending = equivalent_key_or_all_interfaces(&self.inner.in_progress, &remote.host, remote.port)
                    .and_then(|key| self.inner.in_progress.get(&key).map(|entry| entry.value().clone()));

                match pending {
                    Some(released) => released,
                    None => {
                        let key = remote.key();
                        let (done, released) = watch::channel(());
                        self.inner.in_progress.insert(key.clone(), released);
                        return Claim::Open(InProgressGuard {
                            pending: &self.inner.in_progress,
                            key,
                            _done: done,
                        });
                    }
                }
            };

            debug!("Forward of {} already in progress, waiting", remote);
            // Resolves once the sender is dropped
            let _ = released.changed().await;
        }
    }

    async fn open(
        &self,
        properties: TunnelProperties,
        attributes: Option<Attributes>,
        guard: InProgressGuard<'_>,
    ) -> Result<Option<RemoteTunnel>, OpenError> {
        let attributes = match attributes {
            Some(attributes) => Some(attributes),
            None => self.resolve_attributes(&properties.remote).await,
        };
        let properties = self.apply_remembered_properties(properties).await;

        let key = properties.remote.key();
        let local_port = properties.local.unwrap_or(properties.remote.port);
        let request = OpenTunnelRequest {
            remote_authority: self.inner.remote_authority.clone(),
            remote_host: properties.remote.host.clone(),
            remote_port: properties.remote.port,
            local_port: Some(local_port),
            elevate_if_needed: properties.elevate_if_needed
                || attributes
                    .as_ref()
                    .and_then(|a| a.elevate_if_needed)
                    .unwrap_or(false),
            privacy: properties.privacy.clone(),
            protocol: attributes.as_ref().and_then(|a| a.protocol),
        };

        debug!("Opening tunnel for {} on local port {}", key, local_port);
        let tunnel = match self.inner.transport.open_tunnel(request).await {
            Ok(tunnel) => tunnel,
            Err(e) => {
                warn!("Failed to forward {}: {}", key, e);
                return Err(e);
            }
        };
        let Some(local_address) = tunnel.local_address.clone() else {
            debug!("Transport returned no local address for {}", key);
            return Ok(None);
        };

        let forwarded = {
            let mut state = self.inner.state.write().await;
            let mut forwarded = Tunnel {
                remote_host: properties.remote.host.clone(),
                remote_port: properties.remote.port,
                local_address,
                local_port: tunnel.tunnel_local_port,
                protocol: tunnel
                    .protocol
                    .or_else(|| attributes.as_ref().and_then(|a| a.protocol))
                    .unwrap_or_default(),
                name: attributes
                    .as_ref()
                    .and_then(|a| a.label.clone())
                    .or(properties.name),
                closeable: true,
                privacy: tunnel.privacy.clone(),
                running_process: None,
                has_running_process: false,
                pid: None,
                source: properties.source.unwrap_or_default(),
            };
            forwarded.set_process(state.candidate_for(&properties.remote.host, properties.remote.port).as_ref());

            state.forwarded.insert(key.clone(), forwarded.clone());
            state.remote_tunnels.insert(key.clone(), tunnel.clone());
            forwarded
        };
        drop(guard);

        info!("Forwarded {} to {}", key, forwarded.local_address);
        self.schedule_store().await;
        self.notify_port_mismatch(&tunnel, local_port, attributes.as_ref()).await;
        self.inner.events.emit(TunnelEvent::Forwarded(forwarded));
        Ok(Some(tunnel))
    }

    /// Fold remembered properties for the address into a new request
    ///
    /// Stored extension tunnels take precedence over the session cache; both
    /// entries are consumed.
    async fn apply_remembered_properties(&self, mut properties: TunnelProperties) -> TunnelProperties {
        let key = properties.remote.key();
        let mut state = self.inner.state.write().await;

        let remembered = match state.unrestored_extension_tunnels.remove(&key) {
            Some(tunnel) => Some(CachedProperties {
                local: tunnel.local_port,
                name: tunnel.name,
                privacy: Some(tunnel.privacy),
            }),
            None => state.session_cache.remove(&key),
        };

        if let Some(remembered) = remembered {
            debug!("Applying remembered properties to {}", key);
            properties.name = remembered.name.or(properties.name);
            properties.local = remembered.local.or(properties.local);
            properties.privacy = remembered.privacy.or(properties.privacy);
        }
        properties
    }

    async fn merge_into_existing(
        &self,
        existing: Tunnel,
        mut properties: TunnelProperties,
        attributes: Option<Attributes>,
    ) -> Result<Option<RemoteTunnel>, OpenError> {
        let mut action = MergeAction::None;

        let new_name = attributes
            .as_ref()
            .and_then(|a| a.label.clone())
            .or_else(|| properties.name.clone());
        if new_name != existing.name {
            let mut state = self.inner.state.write().await;
            if let Some(tunnel) = state.forwarded.get_mut(&existing.key()) {
                tunnel.name = new_name;
            }
            action = MergeAction::Fire;
        }

        // Only an explicit protocol can override the one the transport negotiated
        if let Some(protocol) = attributes.as_ref().and_then(|a| a.protocol) {
            if protocol != existing.protocol {
                action = MergeAction::Reopen;
            }
        }
        if let Some(privacy) = &properties.privacy {
            if *privacy != existing.privacy {
                action = MergeAction::Reopen;
            }
        }

        match action {
            MergeAction::None => {}
            MergeAction::Fire => {
                self.schedule_store().await;
                self.inner.events.emit(TunnelEvent::Changed);
            }
            MergeAction::Reopen => {
                // The reopened tunnel keeps its original source
                properties.source = Some(existing.source.clone());
                info!("Reopening {} with new attributes", existing.key());
                self.close(&existing.remote_host, existing.remote_port, TunnelCloseReason::User)
                    .await;
                self.do_forward(properties.clone(), attributes).await?;
            }
        }

        let state = self.inner.state.read().await;
        Ok(map_has_address(&state.remote_tunnels, &properties.remote.host, properties.remote.port).cloned())
    }

    /// Close a forwarded tunnel
    ///
    /// Closing an auto-forwarded tunnel because auto forwarding ended keeps
    /// its local port, name and privacy for the rest of the session, so a
    /// later forward of the same address gets them back.
    pub async fn close(&self, host: &str, port: u16, reason: TunnelCloseReason) {
        let key = make_address(host, port);
        if reason == TunnelCloseReason::AutoForwardEnd {
            let mut state = self.inner.state.write().await;
            let cached = state
                .forwarded
                .get(&key)
                .filter(|tunnel| tunnel.source.source == TunnelSource::Auto)
                .map(|tunnel| CachedProperties {
                    local: tunnel.local_port,
                    name: tunnel.name.clone(),
                    privacy: Some(tunnel.privacy.clone()),
                });
            if let Some(cached) = cached {
                state.session_cache.insert(key.clone(), cached);
            }
        }

        self.inner.transport.close_tunnel(host, port).await;
        self.on_tunnel_closed(host, port).await;
    }

    pub(super) async fn on_tunnel_closed(&self, host: &str, port: u16) {
        let key = make_address(host, port);
        let removed = {
            let mut state = self.inner.state.write().await;
            let removed = state.forwarded.remove(&key);
            if removed.is_some() {
                state.remote_tunnels.remove(&key);
            }
            removed
        };

        if removed.is_some() {
            info!("Closed tunnel {}", key);
            self.schedule_store().await;
            self.inner
                .events
                .emit(TunnelEvent::Closed(RemoteAddress::new(host, port)));
        }
    }

    async fn notify_port_mismatch(
        &self,
        tunnel: &RemoteTunnel,
        expected_local: u16,
        attributes: Option<&Attributes>,
    ) {
        let Some(actual_local) = tunnel.tunnel_local_port else {
            return;
        };
        if !attributes.and_then(|a| a.require_local_port).unwrap_or(false) {
            return;
        }
        if actual_local == expected_local {
            return;
        }

        let cooldown = self.inner.config.persistence().mismatch_cooldown;
        let now = Instant::now();
        {
            let mut state = self.inner.state.write().await;
            if let Some(last) = state.last_mismatch_notice {
                if last + cooldown > now {
                    debug!("Suppressing local port mismatch notice for {}", expected_local);
                    return;
                }
            }
            state.last_mismatch_notice = Some(now);
        }

        self.inner.notifier.info(&format!(
            "Local port {expected_local} could not be used for forwarding to remote port {}.\n\n\
             This usually happens when there is already another process using local port {expected_local}.\n\n\
             Port number {actual_local} has been used instead.",
            tunnel.tunnel_remote_port
        ));
    }
}
