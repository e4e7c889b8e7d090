//! kf-registry: Forwarded port tracking for k-Forward
//!
//! The registry keeps the authoritative set of forwarded and detected
//! tunnels for one remote session. It resolves per-port attributes from
//! configuration and runtime providers, deduplicates forwards across
//! equivalent host spellings, annotates tunnels with the processes that own
//! their ports, and persists the forwarded set so the next session can
//! restore it.
//!
//! # Modules
//!
//! - [`registry`]: The `TunnelRegistry` handle and its operations
//! - [`attributes`]: Port attribute rules and provider merging
//! - [`candidates`]: Candidate snapshot reconciliation
//! - [`persistence`]: Storage keys, stored format and write debouncing
//! - [`events`]: Change notifications

pub mod attributes;
pub mod candidates;
pub mod events;
pub mod persistence;
pub mod registry;

pub use attributes::{AttributesResolver, PortsAttributes, RuleKey};
pub use events::{TunnelEvent, TunnelEvents};
pub use persistence::{storage_key, TUNNELS_TO_RESTORE};
pub use registry::{CachedProperties, LogNotifier, TunnelRegistry, TunnelRegistryBuilder};
