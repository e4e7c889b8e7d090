//! Registry change notifications

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use kf_core::{RemoteAddress, Tunnel};

/// Default capacity of the event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change to the set of tunnels or candidates
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum TunnelEvent {
    /// A new tunnel is now forwarded
    Forwarded(Tunnel),
    /// Some tunnel changed in place
    Changed,
    /// A forwarded tunnel was removed
    Closed(RemoteAddress),
    /// A tunnel was renamed
    Renamed(RemoteAddress),
    /// Candidates disappeared; the payload lists the removed addresses
    CandidatesChanged(BTreeMap<String, RemoteAddress>),
    /// Environment tunnels have been loaded
    EnvironmentTunnelsSet,
}

/// Fan-out of [`TunnelEvent`]s to any number of subscribers
#[derive(Debug, Clone)]
pub struct TunnelEvents {
    tx: broadcast::Sender<TunnelEvent>,
}

impl TunnelEvents {
    /// Create a channel holding up to `capacity` undelivered events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; having no subscribers is fine
    pub fn emit(&self, event: TunnelEvent) {
        trace!("Tunnel event: {:?}", event);
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for TunnelEvents {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_all_subscribers() {
        let events = TunnelEvents::default();
        let mut a = events.subscribe();
        let mut b = events.subscribe();
        assert_eq!(events.receiver_count(), 2);

        events.emit(TunnelEvent::Closed(RemoteAddress::new("localhost", 3000)));

        assert_eq!(
            a.recv().await.unwrap(),
            TunnelEvent::Closed(RemoteAddress::new("localhost", 3000))
        );
        assert_eq!(
            b.recv().await.unwrap(),
            TunnelEvent::Closed(RemoteAddress::new("localhost", 3000))
        );
    }

    #[test]
    fn test_emit_without_subscribers() {
        TunnelEvents::default().emit(TunnelEvent::Changed);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&TunnelEvent::Renamed(RemoteAddress::new("db", 5432))).unwrap();
        assert_eq!(json, r#"{"type":"renamed","payload":{"host":"db","port":5432}}"#);
    }
}
