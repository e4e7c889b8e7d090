//! kf-core: Core abstractions and configuration for k-Forward
//!
//! This crate provides the shared tunnel types, host equivalence helpers,
//! collaborator traits and configuration structures used by the registry
//! and the CLI.

pub mod address;
pub mod config;
pub mod error;
pub mod storage;
pub mod traits;
pub mod types;

pub use error::{KfError, OpenError};
pub use types::{
    Attributes, CandidatePort, OnPortForward, Privacy, RemoteAddress, RemoteTunnel, SourceInfo,
    Tunnel, TunnelCloseReason, TunnelDescription, TunnelProperties, TunnelProtocol, TunnelSource,
};
