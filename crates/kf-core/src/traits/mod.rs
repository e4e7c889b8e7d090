//! Collaborator trait definitions
//!
//! The registry never talks to sockets, disks or UI surfaces directly; it is
//! handed implementations of these traits at construction time.

mod provider;
mod storage;
mod transport;

pub use provider::{CandidateFilter, Notifier, PortAttributesProvider};
pub use storage::Storage;
pub use transport::{OpenTunnelRequest, TransportEvent, TunnelTransport};
