//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::make_address;

/// Application protocol spoken over a tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelProtocol {
    /// Plain HTTP (the default)
    #[default]
    Http,
    /// HTTPS
    Https,
}

impl fmt::Display for TunnelProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelProtocol::Http => write!(f, "http"),
            TunnelProtocol::Https => write!(f, "https"),
        }
    }
}

/// Visibility class of a tunnel (private, public, organisation, ...)
///
/// Transports may define their own privacy identifiers, so this is an
/// open string rather than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Privacy(pub String);

impl Privacy {
    /// Only reachable from the local machine
    pub const PRIVATE: &'static str = "private";
    /// Private and cannot be changed by the user
    pub const CONSTANT_PRIVATE: &'static str = "constantPrivate";
    /// Reachable by anyone with the URL
    pub const PUBLIC: &'static str = "public";

    /// Create a privacy value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The default private visibility
    pub fn private() -> Self {
        Self::new(Self::PRIVATE)
    }

    /// Private visibility that may not be changed
    pub fn constant_private() -> Self {
        Self::new(Self::CONSTANT_PRIVATE)
    }

    /// Public visibility
    pub fn public() -> Self {
        Self::new(Self::PUBLIC)
    }

    /// Get the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Privacy {
    fn default() -> Self {
        Self::private()
    }
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Privacy {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Privacy {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Who asked for a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelSource {
    /// Forwarded explicitly by the user
    User,
    /// Forwarded by automatic port detection
    Auto,
    /// Declared by an extension or by the environment
    Extension,
}

/// Tunnel source together with a human-readable description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Originator of the tunnel
    pub source: TunnelSource,
    /// Description shown to the user
    pub description: String,
}

impl SourceInfo {
    /// Tunnel forwarded by the user
    pub fn user() -> Self {
        Self {
            source: TunnelSource::User,
            description: "User Forwarded".to_string(),
        }
    }

    /// Tunnel forwarded by auto detection
    pub fn auto() -> Self {
        Self {
            source: TunnelSource::Auto,
            description: "Auto Forwarded".to_string(),
        }
    }

    /// Tunnel declared by the environment manifest
    pub fn statically_forwarded() -> Self {
        Self::extension("Statically Forwarded")
    }

    /// Tunnel declared by an extension
    pub fn extension(description: impl Into<String>) -> Self {
        Self {
            source: TunnelSource::Extension,
            description: description.into(),
        }
    }
}

impl Default for SourceInfo {
    fn default() -> Self {
        Self::user()
    }
}

/// Why a tunnel is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelCloseReason {
    /// Closed by the transport or for an unspecified reason
    Other,
    /// Closed by the user
    User,
    /// Auto forwarding stopped for the port
    AutoForwardEnd,
}

/// Action taken when a port is auto forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnPortForward {
    /// Show a notification
    Notify,
    /// Open the local address in a browser
    OpenBrowser,
    /// Open the browser only the first time the port is forwarded
    OpenBrowserOnce,
    /// Open the local address in the preview pane
    OpenPreview,
    /// Forward without telling the user
    Silent,
    /// Do not auto forward
    Ignore,
}

/// Auto-forward action vocabulary used by attribute providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProvidedOnAutoForward {
    Notify,
    OpenBrowser,
    OpenPreview,
    Silent,
    Ignore,
    OpenBrowserOnce,
}

impl From<ProvidedOnAutoForward> for OnPortForward {
    fn from(action: ProvidedOnAutoForward) -> Self {
        match action {
            ProvidedOnAutoForward::Notify => OnPortForward::Notify,
            ProvidedOnAutoForward::OpenBrowser => OnPortForward::OpenBrowser,
            ProvidedOnAutoForward::OpenBrowserOnce => OnPortForward::OpenBrowserOnce,
            ProvidedOnAutoForward::OpenPreview => OnPortForward::OpenPreview,
            ProvidedOnAutoForward::Silent => OnPortForward::Silent,
            ProvidedOnAutoForward::Ignore => OnPortForward::Ignore,
        }
    }
}

/// Attributes returned by a runtime attributes provider for one port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidedPortAttributes {
    /// Port the attributes apply to
    pub port: u16,
    /// Requested auto-forward action
    pub auto_forward_action: Option<ProvidedOnAutoForward>,
}

/// Resolved per-port behaviour policy
///
/// The same shape is used for the partial records stored in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Attributes {
    /// Display label for the port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// What to do when the port is auto forwarded
    #[serde(alias = "on_auto_forward", skip_serializing_if = "Option::is_none")]
    pub on_auto_forward: Option<OnPortForward>,
    /// Retry privileged local ports with elevation
    #[serde(alias = "elevate_if_needed", skip_serializing_if = "Option::is_none")]
    pub elevate_if_needed: Option<bool>,
    /// Warn when the local port cannot be honoured
    #[serde(alias = "require_local_port", skip_serializing_if = "Option::is_none")]
    pub require_local_port: Option<bool>,
    /// Protocol spoken on the port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<TunnelProtocol>,
}

impl Attributes {
    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.on_auto_forward.is_none()
            && self.elevate_if_needed.is_none()
            && self.require_local_port.is_none()
            && self.protocol.is_none()
    }
}

/// A host and port pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteAddress {
    /// Host name or IP literal
    pub host: String,
    /// Port number
    pub port: u16,
}

impl RemoteAddress {
    /// Create a new address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Canonical `host:port` key
    pub fn key(&self) -> String {
        make_address(&self.host, self.port)
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A port observed open on the remote host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePort {
    /// Bind host reported by the remote
    pub host: String,
    /// Port number
    pub port: u16,
    /// Command line of the owning process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Owning process id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl CandidatePort {
    /// Create a candidate without process information
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            detail: None,
            pid: None,
        }
    }

    /// Attach process information
    pub fn with_process(mut self, detail: impl Into<String>, pid: u32) -> Self {
        self.detail = Some(detail.into());
        self.pid = Some(pid);
        self
    }

    /// Address of the candidate
    pub fn address(&self) -> RemoteAddress {
        RemoteAddress::new(self.host.clone(), self.port)
    }
}

/// A forwarded or detected port mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tunnel {
    pub remote_host: String,
    pub remote_port: u16,
    /// Local endpoint actually bound
    pub local_address: String,
    #[serde(default)]
    pub local_port: Option<u16>,
    #[serde(default)]
    pub protocol: TunnelProtocol,
    #[serde(default)]
    pub name: Option<String>,
    /// Environment tunnels cannot be closed by the user
    #[serde(default = "default_closeable")]
    pub closeable: bool,
    #[serde(default)]
    pub privacy: Privacy,
    /// Advisory, refreshed from candidate snapshots
    #[serde(default)]
    pub running_process: Option<String>,
    #[serde(default)]
    pub has_running_process: bool,
    #[serde(default)]
    pub pid: Option<u32>,
    pub source: SourceInfo,
}

fn default_closeable() -> bool {
    true
}

impl Tunnel {
    /// Canonical key of the remote endpoint
    pub fn key(&self) -> String {
        make_address(&self.remote_host, self.remote_port)
    }

    /// Remote endpoint
    pub fn remote(&self) -> RemoteAddress {
        RemoteAddress::new(self.remote_host.clone(), self.remote_port)
    }

    /// URI for reaching the tunnel locally
    pub fn local_uri(&self) -> String {
        local_uri(&self.local_address, self.protocol)
    }

    /// Refresh the advisory process fields from a candidate (or clear them)
    pub fn set_process(&mut self, candidate: Option<&CandidatePort>) {
        match candidate {
            Some(candidate) => {
                self.running_process = candidate.detail.clone();
                self.has_running_process = true;
                self.pid = candidate.pid;
            }
            None => {
                self.running_process = None;
                self.has_running_process = false;
                self.pid = None;
            }
        }
    }
}

/// Build a local URI from a bound address
pub fn local_uri(local_address: &str, protocol: TunnelProtocol) -> String {
    if local_address.starts_with("http") {
        local_address.to_string()
    } else {
        format!("{}://{}", protocol, local_address)
    }
}

/// Request to forward a remote port
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TunnelProperties {
    /// Remote endpoint to forward
    pub remote: RemoteAddress,
    /// Requested local port (defaults to the remote port)
    pub local: Option<u16>,
    pub name: Option<String>,
    pub source: Option<SourceInfo>,
    pub elevate_if_needed: bool,
    pub privacy: Option<Privacy>,
}

impl TunnelProperties {
    /// Request a forward of `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            remote: RemoteAddress::new(host, port),
            ..Default::default()
        }
    }

    /// Set the requested local port
    pub fn with_local(mut self, local: u16) -> Self {
        self.local = Some(local);
        self
    }

    /// Set the tunnel name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the source
    pub fn with_source(mut self, source: SourceInfo) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the privacy
    pub fn with_privacy(mut self, privacy: impl Into<Privacy>) -> Self {
        self.privacy = Some(privacy.into());
        self
    }

    /// Allow elevation for privileged local ports
    pub fn elevated(mut self) -> Self {
        self.elevate_if_needed = true;
        self
    }
}

impl Default for RemoteAddress {
    fn default() -> Self {
        Self::new("localhost", 0)
    }
}

/// Handle to a tunnel opened by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTunnel {
    pub tunnel_remote_host: String,
    pub tunnel_remote_port: u16,
    pub tunnel_local_port: Option<u16>,
    pub local_address: Option<String>,
    pub protocol: Option<TunnelProtocol>,
    pub privacy: Privacy,
}

/// Local side of an environment tunnel: either a raw address or a host/port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TunnelLocalAddress {
    Address(String),
    HostPort(RemoteAddress),
}

impl TunnelLocalAddress {
    /// Address string as shown to the user
    pub fn to_address_string(&self) -> String {
        match self {
            TunnelLocalAddress::Address(address) => address.clone(),
            TunnelLocalAddress::HostPort(address) => address.key(),
        }
    }
}

/// Statically declared tunnel from the environment manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelDescription {
    pub remote_address: RemoteAddress,
    pub local_address: TunnelLocalAddress,
}
