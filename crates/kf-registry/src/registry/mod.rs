//! Tunnel registry
//!
//! The `TunnelRegistry` is the single source of truth for forwarded and
//! detected tunnels in a remote session. It wraps every mutable collection
//! behind one RwLock so that lookups by host equivalence and the updates that
//! follow them cannot be interleaved with other operations.
//!
//! # Concurrency Model
//!
//! The state lock is never held across a call into the transport, a storage
//! backend or an attributes provider. Forwards of the same address (or an
//! equivalent spelling of it) are serialized through the in-progress table:
//! the first caller claims the address under the state lock, later callers
//! wait for the claim to be released and then take the merge path against
//! the tunnel the first caller created.
//!
//! # Usage
//!
//! ```ignore
//! let registry = TunnelRegistry::builder(transport)
//!     .storage(storage)
//!     .remote_authority("ssh-remote+devbox")
//!     .workspace("/home/me/project")
//!     .build();
//!
//! registry.restore_forwarded().await;
//! registry.forward(TunnelProperties::new("localhost", 3000), None).await?;
//! ```

mod forward;
mod restore;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use kf_core::address::{
    equivalent_key_or_all_interfaces, make_address, map_has_address, parse_address,
};
use kf_core::config::ConfigStore;
use kf_core::storage::MemoryStorage;
use kf_core::traits::{
    CandidateFilter, Notifier, PortAttributesProvider, Storage, TransportEvent, TunnelTransport,
};
use kf_core::types::TunnelLocalAddress;
use kf_core::{
    Attributes, CandidatePort, Privacy, RemoteAddress, RemoteTunnel, SourceInfo, Tunnel,
    TunnelDescription, TunnelProperties, TunnelProtocol,
};

use crate::attributes::AttributesResolver;
use crate::candidates::{index_candidates, reconcile};
use crate::events::{TunnelEvent, TunnelEvents};
use crate::persistence::{storage_key, StoreDebouncer};

/// Properties remembered for an auto-forwarded tunnel that was closed
/// because auto forwarding ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedProperties {
    pub local: Option<u16>,
    pub name: Option<String>,
    pub privacy: Option<Privacy>,
}

#[derive(Default)]
struct RegistryState {
    forwarded: BTreeMap<String, Tunnel>,
    detected: BTreeMap<String, Tunnel>,
    remote_tunnels: BTreeMap<String, RemoteTunnel>,
    candidates: Option<BTreeMap<String, CandidatePort>>,
    unrestored_extension_tunnels: HashMap<String, Tunnel>,
    session_cache: HashMap<String, CachedProperties>,
    environment_tunnels_set: bool,
    last_mismatch_notice: Option<Instant>,
}

impl RegistryState {
    fn candidate_for(&self, host: &str, port: u16) -> Option<CandidatePort> {
        self.candidates
            .as_ref()
            .and_then(|candidates| map_has_address(candidates, host, port))
            .cloned()
    }
}

struct Inner {
    state: RwLock<RegistryState>,
    /// Addresses currently being opened; the receiver closes when the claim ends
    in_progress: DashMap<String, watch::Receiver<()>>,
    transport: Arc<dyn TunnelTransport>,
    storage: Arc<dyn Storage>,
    config: Arc<ConfigStore>,
    notifier: Arc<dyn Notifier>,
    attributes: AttributesResolver,
    candidate_filter: RwLock<Option<Arc<dyn CandidateFilter>>>,
    events: TunnelEvents,
    remote_authority: Option<String>,
    storage_key: Option<String>,
    restore_complete: watch::Sender<bool>,
    debouncer: StoreDebouncer,
    /// Last value written to or read from storage
    known_restore_value: tokio::sync::Mutex<Option<String>>,
}

/// Notifier that writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn info(&self, message: &str) {
        info!("{}", message);
    }
}

/// Builder for [`TunnelRegistry`]
pub struct TunnelRegistryBuilder {
    transport: Arc<dyn TunnelTransport>,
    storage: Option<Arc<dyn Storage>>,
    config: Option<Arc<ConfigStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    remote_authority: Option<String>,
    workspace: Option<String>,
}

impl TunnelRegistryBuilder {
    /// Storage backend for persisted forwards (defaults to memory)
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Live configuration
    pub fn config(mut self, config: Arc<ConfigStore>) -> Self {
        self.config = Some(config);
        self
    }

    /// User notification surface (defaults to the log)
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Remote authority of the session
    ///
    /// With an authority set, `forward` waits until `restore_forwarded`
    /// has completed.
    pub fn remote_authority(mut self, authority: impl Into<String>) -> Self {
        self.remote_authority = Some(authority.into());
        self
    }

    /// Workspace identity used to scope persisted forwards
    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn build(self) -> TunnelRegistry {
        let config = self.config.unwrap_or_default();
        let storage_key = storage_key(self.remote_authority.as_deref(), self.workspace.as_deref());
        let (restore_complete, _) = watch::channel(false);

        TunnelRegistry {
            inner: Arc::new(Inner {
                state: RwLock::new(RegistryState::default()),
                in_progress: DashMap::new(),
                transport: self.transport,
                storage: self
                    .storage
                    .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
                attributes: AttributesResolver::new(Arc::clone(&config)),
                config,
                notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
                candidate_filter: RwLock::new(None),
                events: TunnelEvents::default(),
                remote_authority: self.remote_authority,
                storage_key,
                restore_complete,
                debouncer: StoreDebouncer::new(),
                known_restore_value: tokio::sync::Mutex::new(None),
            }),
        }
    }
}

/// Shared handle to the tunnel registry
///
/// Cloning is cheap; all clones see the same state.
#[derive(Clone)]
pub struct TunnelRegistry {
    inner: Arc<Inner>,
}

impl TunnelRegistry {
    /// Start building a registry on top of `transport`
    pub fn builder(transport: Arc<dyn TunnelTransport>) -> TunnelRegistryBuilder {
        TunnelRegistryBuilder {
            transport,
            storage: None,
            config: None,
            notifier: None,
            remote_authority: None,
            workspace: None,
        }
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
        self.inner.events.subscribe()
    }

    /// Live configuration the registry reads from
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.inner.config
    }

    /// Key under which forwarded ports are persisted
    pub fn storage_key(&self) -> Option<&str> {
        self.inner.storage_key.as_deref()
    }

    /// Snapshot of forwarded tunnels, in address order
    pub async fn forwarded(&self) -> Vec<Tunnel> {
        self.inner.state.read().await.forwarded.values().cloned().collect()
    }

    /// Snapshot of detected (environment) tunnels, in address order
    pub async fn detected(&self) -> Vec<Tunnel> {
        self.inner.state.read().await.detected.values().cloned().collect()
    }

    /// Find a forwarded or detected tunnel by equivalent address
    pub async fn get(&self, host: &str, port: u16) -> Option<Tunnel> {
        let state = self.inner.state.read().await;
        map_has_address(&state.forwarded, host, port)
            .or_else(|| map_has_address(&state.detected, host, port))
            .cloned()
    }

    /// Transport handle of a forwarded tunnel
    pub async fn remote_tunnel(&self, host: &str, port: u16) -> Option<RemoteTunnel> {
        let state = self.inner.state.read().await;
        map_has_address(&state.remote_tunnels, host, port).cloned()
    }

    /// Properties cached for `host:port` when auto forwarding ended
    pub async fn cached_properties(&self, host: &str, port: u16) -> Option<CachedProperties> {
        self.inner
            .state
            .read()
            .await
            .session_cache
            .get(&make_address(host, port))
            .cloned()
    }

    /// Local address of the tunnel stored under exactly `host:port`
    pub async fn address(&self, host: &str, port: u16) -> Option<String> {
        let key = make_address(host, port);
        let state = self.inner.state.read().await;
        state
            .forwarded
            .get(&key)
            .or_else(|| state.detected.get(&key))
            .map(|tunnel| tunnel.local_address.clone())
    }

    /// Local URI of the tunnel stored under exactly `host:port`
    pub async fn local_uri(&self, host: &str, port: u16) -> Option<String> {
        let key = make_address(host, port);
        let state = self.inner.state.read().await;
        state
            .forwarded
            .get(&key)
            .or_else(|| state.detected.get(&key))
            .map(Tunnel::local_uri)
    }

    /// Rename a tunnel
    ///
    /// Forwarded tunnels are found by equivalence and the change is
    /// persisted; detected tunnels only by exact key.
    pub async fn name(&self, host: &str, port: u16, name: impl Into<String>) {
        let name = name.into();
        let mut state = self.inner.state.write().await;

        if let Some(key) = equivalent_key_or_all_interfaces(&state.forwarded, host, port) {
            if let Some(tunnel) = state.forwarded.get_mut(&key) {
                tunnel.name = Some(name);
            }
            drop(state);
            self.schedule_store().await;
            self.inner
                .events
                .emit(TunnelEvent::Renamed(RemoteAddress::new(host, port)));
            return;
        }

        if let Some(tunnel) = state.detected.get_mut(&make_address(host, port)) {
            tunnel.name = Some(name);
            drop(state);
            self.inner
                .events
                .emit(TunnelEvent::Renamed(RemoteAddress::new(host, port)));
        }
    }

    /// Whether environment tunnels have been loaded
    pub async fn environment_tunnels_set(&self) -> bool {
        self.inner.state.read().await.environment_tunnels_set
    }

    /// Load statically declared tunnels into the detected map
    ///
    /// Passing `None` only marks the environment as loaded.
    pub async fn add_environment_tunnels(&self, tunnels: Option<Vec<TunnelDescription>>) {
        let mut state = self.inner.state.write().await;

        for description in tunnels.unwrap_or_default() {
            let remote = description.remote_address;
            let local_address = description.local_address.to_address_string();
            let local_port = match &description.local_address {
                TunnelLocalAddress::HostPort(address) => Some(address.port),
                TunnelLocalAddress::Address(address) => parse_address(address).map(|a| a.port),
            };
            let privacy = Privacy::constant_private();

            let mut tunnel = Tunnel {
                remote_host: remote.host.clone(),
                remote_port: remote.port,
                local_address: local_address.clone(),
                local_port,
                protocol: TunnelProtocol::Http,
                name: None,
                closeable: false,
                privacy: privacy.clone(),
                running_process: None,
                has_running_process: false,
                pid: None,
                source: SourceInfo::statically_forwarded(),
            };
            tunnel.set_process(state.candidate_for(&remote.host, remote.port).as_ref());

            self.inner.transport.set_environment_tunnel(
                &remote,
                &local_address,
                &privacy,
                TunnelProtocol::Http,
            );
            debug!("Environment tunnel {} -> {}", remote, local_address);
            state.detected.insert(remote.key(), tunnel);
        }

        state.environment_tunnels_set = true;
        drop(state);

        self.inner.events.emit(TunnelEvent::EnvironmentTunnelsSet);
        self.inner.events.emit(TunnelEvent::Changed);
    }

    /// Install or remove the filter applied to candidate snapshots
    pub async fn set_candidate_filter(&self, filter: Option<Arc<dyn CandidateFilter>>) {
        *self.inner.candidate_filter.write().await = filter;
    }

    /// Replace the candidate snapshot
    ///
    /// Tunnels are annotated with the process that owns their port; tunnels
    /// whose candidate vanished have the annotation cleared. Subscribers get
    /// the removed addresses.
    pub async fn set_candidates(&self, candidates: Vec<CandidatePort>) {
        let filter = self.inner.candidate_filter.read().await.clone();
        let candidates = match filter {
            Some(filter) => filter.filter(candidates).await,
            None => candidates,
        };
        let current = index_candidates(candidates);

        let removed = {
            let mut guard = self.inner.state.write().await;
            let state = &mut *guard;
            let previous = state.candidates.take();
            let removed = reconcile(
                previous.as_ref(),
                &current,
                &mut state.forwarded,
                &mut state.detected,
            );
            state.candidates = Some(current);
            removed
        };

        debug!("Candidates updated, {} removed", removed.len());
        self.inner.events.emit(TunnelEvent::CandidatesChanged(removed));
    }

    /// Current candidates (empty before the first snapshot)
    pub async fn candidates(&self) -> Vec<CandidatePort> {
        self.candidates_or_none().await.unwrap_or_default()
    }

    /// Current candidates, or `None` before the first snapshot
    pub async fn candidates_or_none(&self) -> Option<Vec<CandidatePort>> {
        self.inner
            .state
            .read()
            .await
            .candidates
            .as_ref()
            .map(|candidates| candidates.values().cloned().collect())
    }

    /// Register a runtime attributes provider
    pub async fn add_attributes_provider(&self, provider: Arc<dyn PortAttributesProvider>) {
        self.inner.attributes.add_provider(provider).await;
    }

    /// Resolve attributes for `ports` using the current candidates
    pub async fn get_attributes(
        &self,
        ports: &[RemoteAddress],
        check_providers: bool,
    ) -> Option<HashMap<u16, Attributes>> {
        let candidates = self.candidate_snapshot().await;
        self.inner
            .attributes
            .get_attributes(ports, &candidates, check_providers)
            .await
    }

    async fn resolve_attributes(&self, remote: &RemoteAddress) -> Option<Attributes> {
        self.get_attributes(std::slice::from_ref(remote), true)
            .await
            .and_then(|mut attributes| attributes.remove(&remote.port))
    }

    async fn candidate_snapshot(&self) -> BTreeMap<String, CandidatePort> {
        self.inner
            .state
            .read()
            .await
            .candidates
            .clone()
            .unwrap_or_default()
    }

    /// Re-apply configuration to forwarded tunnels
    ///
    /// Tunnels whose configured protocol no longer matches are reopened and
    /// configured labels replace tunnel names.
    pub async fn refresh_attributes(&self) {
        self.inner.attributes.reload().await;

        let tunnels = self.forwarded().await;
        let addresses: Vec<RemoteAddress> = tunnels.iter().map(Tunnel::remote).collect();
        let Some(all_attributes) = self.get_attributes(&addresses, false).await else {
            return;
        };

        for tunnel in tunnels {
            let attributes = all_attributes.get(&tunnel.remote_port);
            let protocol = attributes.and_then(|a| a.protocol);

            if (protocol.is_some() || tunnel.protocol != TunnelProtocol::Http)
                && protocol != Some(tunnel.protocol)
            {
                let mut properties = TunnelProperties::new(
                    tunnel.remote_host.clone(),
                    tunnel.remote_port,
                );
                properties.local = tunnel.local_port;
                properties.name = tunnel.name.clone();
                properties.source = Some(tunnel.source.clone());
                properties.privacy = Some(tunnel.privacy.clone());
                let mut reopen_with = attributes.cloned().unwrap_or_default();
                reopen_with.protocol = Some(protocol.unwrap_or_default());
                if let Err(e) = self.do_forward(properties, Some(reopen_with)).await {
                    warn!("Failed to reopen {} with new protocol: {}", tunnel.key(), e);
                }
            }

            if let Some(label) = attributes.and_then(|a| a.label.clone()) {
                if Some(&label) != tunnel.name.as_ref() {
                    self.name(&tunnel.remote_host, tunnel.remote_port, label).await;
                }
            }
        }
    }

    /// Refresh attributes whenever the configuration changes
    pub fn spawn_config_watcher(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let mut changes = registry.inner.config.subscribe();
        changes.borrow_and_update();

        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                debug!("Configuration changed, refreshing port attributes");
                registry.refresh_attributes().await;
            }
        })
    }

    /// Forwarded, detected or being opened, under any equivalent host
    fn is_tracked(&self, state: &RegistryState, host: &str, port: u16) -> bool {
        map_has_address(&state.forwarded, host, port).is_some()
            || map_has_address(&state.detected, host, port).is_some()
            || equivalent_key_or_all_interfaces(&self.inner.in_progress, host, port).is_some()
    }

    /// Record a tunnel the transport opened on its own
    pub async fn handle_tunnel_opened(&self, tunnel: RemoteTunnel) {
        let host = tunnel.tunnel_remote_host.clone();
        let port = tunnel.tunnel_remote_port;
        let key = make_address(&host, port);

        let known = {
            let state = self.inner.state.read().await;
            self.is_tracked(&state, &host, port)
        };

        let mut adopted = None;
        if !known {
            if let Some(local_address) = tunnel.local_address.clone() {
                let attributes = self
                    .resolve_attributes(&RemoteAddress::new(host.clone(), port))
                    .await;
                // Attribute resolution awaited, so check again under the write lock
                let mut state = self.inner.state.write().await;
                if !self.is_tracked(&state, &host, port) {
                    let mut forwarded = Tunnel {
                        remote_host: host.clone(),
                        remote_port: port,
                        local_address,
                        local_port: tunnel.tunnel_local_port,
                        protocol: attributes
                            .as_ref()
                            .and_then(|a| a.protocol)
                            .unwrap_or_default(),
                        name: attributes.and_then(|a| a.label),
                        closeable: true,
                        privacy: tunnel.privacy.clone(),
                        running_process: None,
                        has_running_process: false,
                        pid: None,
                        source: SourceInfo::user(),
                    };
                    forwarded.set_process(state.candidate_for(&host, port).as_ref());
                    state.forwarded.insert(key.clone(), forwarded.clone());
                    adopted = Some(forwarded);
                }
            }
        }

        self.inner
            .state
            .write()
            .await
            .remote_tunnels
            .insert(key, tunnel);
        self.schedule_store().await;

        if let Some(forwarded) = adopted {
            info!("Tracking tunnel {} opened by the transport", forwarded.key());
            self.inner.events.emit(TunnelEvent::Forwarded(forwarded));
        }
    }

    /// Forget a tunnel the transport closed
    pub async fn handle_tunnel_closed(&self, host: &str, port: u16) {
        self.on_tunnel_closed(host, port).await;
    }

    /// Import tunnels the transport already holds
    ///
    /// Returns the number of tunnels added.
    pub async fn adopt_transport_tunnels(&self) -> usize {
        let tunnels = self.inner.transport.tunnels().await;
        let addresses: Vec<RemoteAddress> = tunnels
            .iter()
            .map(|t| RemoteAddress::new(t.tunnel_remote_host.clone(), t.tunnel_remote_port))
            .collect();
        let attributes = self
            .get_attributes(&addresses, true)
            .await
            .unwrap_or_default();

        let mut adopted = Vec::new();
        {
            let mut state = self.inner.state.write().await;
            for tunnel in tunnels {
                let Some(local_address) = tunnel.local_address.clone() else {
                    continue;
                };
                let host = tunnel.tunnel_remote_host.clone();
                let port = tunnel.tunnel_remote_port;
                if map_has_address(&state.forwarded, &host, port).is_some() {
                    continue;
                }

                let port_attributes = attributes.get(&port);
                let mut forwarded = Tunnel {
                    remote_host: host.clone(),
                    remote_port: port,
                    local_address,
                    local_port: tunnel.tunnel_local_port,
                    protocol: tunnel
                        .protocol
                        .or_else(|| port_attributes.and_then(|a| a.protocol))
                        .unwrap_or_default(),
                    name: port_attributes.and_then(|a| a.label.clone()),
                    closeable: true,
                    privacy: tunnel.privacy.clone(),
                    running_process: None,
                    has_running_process: false,
                    pid: None,
                    source: SourceInfo::user(),
                };
                forwarded.set_process(state.candidate_for(&host, port).as_ref());

                let key = make_address(&host, port);
                state.forwarded.insert(key.clone(), forwarded.clone());
                state.remote_tunnels.insert(key, tunnel);
                adopted.push(forwarded);
            }
        }

        if !adopted.is_empty() {
            self.schedule_store().await;
        }
        let count = adopted.len();
        for forwarded in adopted {
            self.inner.events.emit(TunnelEvent::Forwarded(forwarded));
        }
        debug!("Adopted {} existing transport tunnels", count);
        count
    }

    /// Apply transport notifications until the channel closes
    pub fn spawn_transport_listener(&self, mut events: mpsc::Receiver<TransportEvent>) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Opened(tunnel) => registry.handle_tunnel_opened(tunnel).await,
                    TransportEvent::Closed(address) => {
                        registry.handle_tunnel_closed(&address.host, address.port).await
                    }
                }
            }
            debug!("Transport event stream closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kf_core::traits::OpenTunnelRequest;
    use kf_core::OpenError;

    struct EchoTransport;

    #[async_trait]
    impl TunnelTransport for EchoTransport {
        async fn open_tunnel(&self, request: OpenTunnelRequest) -> Result<RemoteTunnel, OpenError> {
            let local = request.local_port.unwrap_or(request.remote_port);
            Ok(RemoteTunnel {
                tunnel_remote_host: request.remote_host,
                tunnel_remote_port: request.remote_port,
                tunnel_local_port: Some(local),
                local_address: Some(format!("localhost:{local}")),
                protocol: request.protocol,
                privacy: request.privacy.unwrap_or_default(),
            })
        }

        async fn close_tunnel(&self, _host: &str, _port: u16) {}

        async fn tunnels(&self) -> Vec<RemoteTunnel> {
            vec![RemoteTunnel {
                tunnel_remote_host: "localhost".into(),
                tunnel_remote_port: 7000,
                tunnel_local_port: Some(7001),
                local_address: Some("localhost:7001".into()),
                protocol: None,
                privacy: Privacy::private(),
            }]
        }
    }

    fn registry() -> TunnelRegistry {
        TunnelRegistry::builder(Arc::new(EchoTransport)).build()
    }

    #[tokio::test]
    async fn test_environment_tunnels_are_detected() {
        let registry = registry();
        assert!(!registry.environment_tunnels_set().await);

        registry
            .add_environment_tunnels(Some(vec![TunnelDescription {
                remote_address: RemoteAddress::new("localhost", 8080),
                local_address: TunnelLocalAddress::Address("localhost:18080".into()),
            }]))
            .await;

        assert!(registry.environment_tunnels_set().await);
        let detected = registry.detected().await;
        assert_eq!(detected.len(), 1);
        assert!(!detected[0].closeable);
        assert_eq!(detected[0].privacy, Privacy::constant_private());
        assert_eq!(detected[0].local_port, Some(18080));
        assert_eq!(detected[0].source, SourceInfo::statically_forwarded());
        assert_eq!(
            registry.address("localhost", 8080).await.as_deref(),
            Some("localhost:18080")
        );
        assert_eq!(
            registry.local_uri("localhost", 8080).await.as_deref(),
            Some("http://localhost:18080")
        );
    }

    #[tokio::test]
    async fn test_rename_detected_uses_exact_key() {
        let registry = registry();
        registry
            .add_environment_tunnels(Some(vec![TunnelDescription {
                remote_address: RemoteAddress::new("localhost", 8080),
                local_address: TunnelLocalAddress::Address("localhost:18080".into()),
            }]))
            .await;

        registry.name("127.0.0.1", 8080, "ignored").await;
        assert_eq!(registry.detected().await[0].name, None);

        let mut events = registry.subscribe();
        registry.name("localhost", 8080, "app").await;
        assert_eq!(registry.detected().await[0].name.as_deref(), Some("app"));
        assert_eq!(
            events.recv().await.unwrap(),
            TunnelEvent::Renamed(RemoteAddress::new("localhost", 8080))
        );
    }

    #[tokio::test]
    async fn test_transport_opened_tunnel_is_tracked_once() {
        let registry = registry();
        let tunnel = RemoteTunnel {
            tunnel_remote_host: "127.0.0.1".into(),
            tunnel_remote_port: 9000,
            tunnel_local_port: Some(9000),
            local_address: Some("localhost:9000".into()),
            protocol: None,
            privacy: Privacy::private(),
        };

        registry.handle_tunnel_opened(tunnel.clone()).await;
        registry.handle_tunnel_opened(tunnel).await;

        let forwarded = registry.forwarded().await;
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].source, SourceInfo::user());
        assert!(registry.remote_tunnel("localhost", 9000).await.is_some());

        registry.handle_tunnel_closed("127.0.0.1", 9000).await;
        assert!(registry.forwarded().await.is_empty());
    }

    /// Provider that parks until released
    struct GatedProvider {
        entered: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl PortAttributesProvider for GatedProvider {
        async fn provide_port_attributes(
            &self,
            _ports: &[u16],
            _pid: Option<u32>,
            _command_line: Option<&str>,
            _cancel: tokio_util::sync::CancellationToken,
        ) -> Vec<kf_core::types::ProvidedPortAttributes> {
            self.entered.notify_one();
            self.release.notified().await;
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_transport_opened_tunnel_detected_meanwhile_is_not_adopted() {
        let registry = registry();
        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        registry
            .add_attributes_provider(Arc::new(GatedProvider {
                entered: entered.clone(),
                release: release.clone(),
            }))
            .await;

        let opened = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .handle_tunnel_opened(RemoteTunnel {
                        tunnel_remote_host: "localhost".into(),
                        tunnel_remote_port: 9000,
                        tunnel_local_port: Some(9000),
                        local_address: Some("localhost:9000".into()),
                        protocol: None,
                        privacy: Privacy::private(),
                    })
                    .await;
            })
        };

        entered.notified().await;
        registry
            .add_environment_tunnels(Some(vec![TunnelDescription {
                remote_address: RemoteAddress::new("localhost", 9000),
                local_address: TunnelLocalAddress::Address("localhost:9000".into()),
            }]))
            .await;
        release.notify_one();
        opened.await.unwrap();

        assert!(registry.forwarded().await.is_empty());
        assert_eq!(registry.detected().await.len(), 1);
    }

    #[tokio::test]
    async fn test_adopt_transport_tunnels() {
        let registry = registry();
        assert_eq!(registry.adopt_transport_tunnels().await, 1);
        assert_eq!(registry.adopt_transport_tunnels().await, 0);
        let tunnel = registry.get("127.0.0.1", 7000).await.unwrap();
        assert_eq!(tunnel.local_port, Some(7001));
    }

    #[tokio::test]
    async fn test_candidates_or_none() {
        let registry = registry();
        assert!(registry.candidates_or_none().await.is_none());
        assert!(registry.candidates().await.is_empty());

        registry
            .set_candidates(vec![CandidatePort::new("localhost", 3000)])
            .await;
        assert_eq!(registry.candidates().await.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_listener_applies_events() {
        let registry = registry();
        let (tx, rx) = mpsc::channel(8);
        let listener = registry.spawn_transport_listener(rx);

        tx.send(TransportEvent::Opened(RemoteTunnel {
            tunnel_remote_host: "localhost".into(),
            tunnel_remote_port: 4000,
            tunnel_local_port: Some(4000),
            local_address: Some("localhost:4000".into()),
            protocol: None,
            privacy: Privacy::private(),
        }))
        .await
        .unwrap();
        tx.send(TransportEvent::Closed(RemoteAddress::new("localhost", 4000)))
            .await
            .unwrap();
        drop(tx);
        listener.await.unwrap();

        assert!(registry.forwarded().await.is_empty());
    }
}
