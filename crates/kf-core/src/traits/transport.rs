//! Tunnel transport traits

use async_trait::async_trait;

use crate::error::OpenError;
use crate::types::{Privacy, RemoteAddress, RemoteTunnel, TunnelProtocol};

/// Parameters for opening a socket tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTunnelRequest {
    /// Remote authority the tunnel belongs to, if any
    pub remote_authority: Option<String>,
    /// Remote host to forward
    pub remote_host: String,
    /// Remote port to forward
    pub remote_port: u16,
    /// Preferred local port
    pub local_port: Option<u16>,
    /// Retry privileged local ports with elevation
    pub elevate_if_needed: bool,
    /// Requested visibility
    pub privacy: Option<Privacy>,
    /// Requested protocol
    pub protocol: Option<TunnelProtocol>,
}

/// Abstraction over the component that physically opens tunnels
#[async_trait]
pub trait TunnelTransport: Send + Sync {
    /// Open a tunnel
    ///
    /// The transport may bind a different local port than requested; the
    /// returned handle reports the port actually used.
    async fn open_tunnel(&self, request: OpenTunnelRequest) -> Result<RemoteTunnel, OpenError>;

    /// Close the tunnel for `host:port`
    async fn close_tunnel(&self, host: &str, port: u16);

    /// Tunnels the transport already holds
    async fn tunnels(&self) -> Vec<RemoteTunnel> {
        Vec::new()
    }

    /// Register a statically declared tunnel so the transport can answer for it
    fn set_environment_tunnel(
        &self,
        _remote: &RemoteAddress,
        _local_address: &str,
        _privacy: &Privacy,
        _protocol: TunnelProtocol,
    ) {
    }
}

/// Notifications pushed by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A tunnel was opened outside of the registry
    Opened(RemoteTunnel),
    /// A tunnel was closed
    Closed(RemoteAddress),
}
