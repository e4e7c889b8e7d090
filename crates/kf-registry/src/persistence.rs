//! Persisted forwarded ports
//!
//! Forwarded tunnels are stored as a JSON array under a key namespaced by
//! remote authority and workspace. Writes are debounced so bursts of
//! forwards result in a single store.

use std::collections::BTreeMap;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::warn;

use kf_core::{Tunnel, TunnelProperties, TunnelSource};

/// Storage key prefix, also the legacy un-namespaced key
pub const TUNNELS_TO_RESTORE: &str = "remote.tunnels.toRestore";

/// Authority segment used when the session is not remote
const LOCAL_AUTHORITY: &str = "local";

/// Short stable digest of a workspace identity
pub fn workspace_hash(workspace: &str) -> String {
    let digest = Sha256::digest(workspace.as_bytes());
    hex::encode(&digest[..8])
}

/// Namespaced storage key, or `None` when there is no workspace to scope to
pub fn storage_key(remote_authority: Option<&str>, workspace: Option<&str>) -> Option<String> {
    let workspace = workspace?;
    Some(format!(
        "{}.{}.{}",
        TUNNELS_TO_RESTORE,
        remote_authority.unwrap_or(LOCAL_AUTHORITY),
        workspace_hash(workspace)
    ))
}

/// Serialize forwarded tunnels in key order
pub fn serialize_tunnels(forwarded: &BTreeMap<String, Tunnel>) -> Result<String, serde_json::Error> {
    let tunnels: Vec<&Tunnel> = forwarded.values().collect();
    serde_json::to_string(&tunnels)
}

/// Parse a stored value, treating garbage as empty
pub fn parse_tunnels(value: &str) -> Vec<Tunnel> {
    match serde_json::from_str(value) {
        Ok(tunnels) => tunnels,
        Err(e) => {
            warn!("Ignoring unreadable forwarded ports record: {}", e);
            Vec::new()
        }
    }
}

/// What to do with one stored tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreAction {
    /// Forward it again
    Forward(TunnelProperties),
    /// The environment already provides it; only carry the name over
    Patch { name: Option<String> },
    /// Keep it aside until an extension forwards the address
    Defer,
    /// The environment already provides it
    Skip,
}

/// Decide how a stored tunnel is restored
///
/// `already_detected` tells whether an environment tunnel for the address
/// is present.
pub fn restore_action(tunnel: &Tunnel, already_detected: bool) -> RestoreAction {
    match (tunnel.source.source, already_detected) {
        (TunnelSource::Extension, true) => RestoreAction::Patch {
            name: tunnel.name.clone(),
        },
        (TunnelSource::Extension, false) => RestoreAction::Defer,
        (_, true) => RestoreAction::Skip,
        (_, false) => RestoreAction::Forward(restore_properties(tunnel)),
    }
}

fn restore_properties(tunnel: &Tunnel) -> TunnelProperties {
    TunnelProperties {
        remote: tunnel.remote(),
        local: tunnel.local_port,
        name: tunnel.name.clone(),
        source: Some(tunnel.source.clone()),
        elevate_if_needed: true,
        privacy: Some(tunnel.privacy.clone()),
    }
}

#[derive(Debug, Default)]
struct DebounceState {
    deadline: Option<Instant>,
    waiting: bool,
}

/// Sliding-window debounce for store requests
#[derive(Debug, Default)]
pub struct StoreDebouncer {
    state: Mutex<DebounceState>,
}

impl StoreDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push the deadline to `window` from now
    ///
    /// Returns true when no waiter is running and the caller must start one.
    pub async fn touch(&self, window: Duration) -> bool {
        let mut state = self.state.lock().await;
        state.deadline = Some(Instant::now() + window);
        if state.waiting {
            false
        } else {
            state.waiting = true;
            true
        }
    }

    /// Sleep until the deadline stops moving
    pub async fn wait_quiet(&self) {
        loop {
            let deadline = self.state.lock().await.deadline;
            let Some(deadline) = deadline else {
                self.state.lock().await.waiting = false;
                return;
            };

            sleep_until(deadline).await;

            let mut state = self.state.lock().await;
            if state.deadline.map_or(true, |current| current <= Instant::now()) {
                state.deadline = None;
                state.waiting = false;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_core::{Privacy, SourceInfo, TunnelProtocol};

    fn stored(host: &str, port: u16, source: SourceInfo) -> Tunnel {
        Tunnel {
            remote_host: host.to_string(),
            remote_port: port,
            local_address: format!("localhost:{}", port + 1),
            local_port: Some(port + 1),
            protocol: TunnelProtocol::Http,
            name: Some("svc".into()),
            closeable: true,
            privacy: Privacy::public(),
            running_process: None,
            has_running_process: false,
            pid: None,
            source,
        }
    }

    #[test]
    fn test_storage_key_is_namespaced() {
        let key = storage_key(Some("ssh-remote+devbox"), Some("/home/me/project")).unwrap();
        assert!(key.starts_with("remote.tunnels.toRestore.ssh-remote+devbox."));
        assert_eq!(key.rsplit('.').next().unwrap().len(), 16);

        let other = storage_key(Some("ssh-remote+devbox"), Some("/home/me/other")).unwrap();
        assert_ne!(key, other);
        assert!(storage_key(Some("ssh-remote+devbox"), None).is_none());
        assert!(storage_key(None, Some("/w")).unwrap().contains(".local."));
    }

    #[test]
    fn test_serialized_order_is_stable() {
        let mut forwarded = BTreeMap::new();
        forwarded.insert("localhost:9000".to_string(), stored("localhost", 9000, SourceInfo::user()));
        forwarded.insert("localhost:3000".to_string(), stored("localhost", 3000, SourceInfo::user()));

        let json = serialize_tunnels(&forwarded).unwrap();
        let parsed = parse_tunnels(&json);
        assert_eq!(parsed[0].remote_port, 3000);
        assert_eq!(parsed[1].remote_port, 9000);
        assert!(parse_tunnels("not json").is_empty());
    }

    #[test]
    fn test_restore_actions() {
        let user = stored("localhost", 3000, SourceInfo::user());
        match restore_action(&user, false) {
            RestoreAction::Forward(props) => {
                assert_eq!(props.local, Some(3001));
                assert_eq!(props.name.as_deref(), Some("svc"));
                assert_eq!(props.privacy, Some(Privacy::public()));
                assert_eq!(props.source, Some(SourceInfo::user()));
                assert!(props.elevate_if_needed);
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(restore_action(&user, true), RestoreAction::Skip);

        let extension = stored("localhost", 4000, SourceInfo::extension("Python"));
        assert_eq!(restore_action(&extension, false), RestoreAction::Defer);
        assert_eq!(
            restore_action(&extension, true),
            RestoreAction::Patch {
                name: Some("svc".into())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_slides_deadline() {
        let debouncer = std::sync::Arc::new(StoreDebouncer::new());
        let window = Duration::from_millis(1000);
        let start = Instant::now();

        assert!(debouncer.touch(window).await);
        let waiter = {
            let debouncer = debouncer.clone();
            tokio::spawn(async move { debouncer.wait_quiet().await })
        };

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!debouncer.touch(window).await);

        waiter.await.unwrap();
        assert!(Instant::now() - start >= Duration::from_millis(1600));
        assert!(debouncer.touch(window).await);
    }
}
