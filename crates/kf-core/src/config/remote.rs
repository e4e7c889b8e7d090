//! Remote session configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::serde_utils::duration_millis;
use crate::types::Attributes;

/// Port forwarding settings for a remote session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Per-port attribute rules (`remote.portsAttributes`)
    ///
    /// Keys are a port (`"3000"`), a range (`"3000-3999"`), a host and port
    /// (`"db:5432"`) or a regular expression matched against the command line
    /// of the process that opened the port.
    pub ports_attributes: BTreeMap<String, Attributes>,

    /// Attributes for ports that match no rule (`remote.otherPortsAttributes`)
    pub other_ports_attributes: Option<Attributes>,

    /// Persist forwarded ports and restore them on the next session
    /// (`remote.restoreForwardedPorts`)
    pub restore_forwarded_ports: bool,

    /// Timers used by the registry
    pub persistence: PersistenceConfig,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ports_attributes: BTreeMap::new(),
            other_ports_attributes: None,
            restore_forwarded_ports: true,
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Timing knobs for persistence and user prompts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Quiet period before forwarded ports are written to storage
    #[serde(with = "duration_millis")]
    pub debounce: Duration,

    /// Minimum time between two local port mismatch notices
    #[serde(with = "duration_millis")]
    pub mismatch_cooldown: Duration,

    /// Upper bound on a single attributes provider batch
    #[serde(with = "duration_millis")]
    pub provider_timeout: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            mismatch_cooldown: Duration::from_secs(10),
            provider_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OnPortForward, TunnelProtocol};

    #[test]
    fn test_parse_ports_attributes() {
        let toml = r#"
            restore_forwarded_ports = false

            [ports_attributes."3000"]
            label = "Frontend"
            onAutoForward = "openBrowser"

            [ports_attributes."9000-9100"]
            protocol = "https"

            [other_ports_attributes]
            on_auto_forward = "silent"
        "#;

        let config: RemoteConfig = toml::from_str(toml).unwrap();
        assert!(!config.restore_forwarded_ports);
        assert_eq!(config.ports_attributes.len(), 2);

        let frontend = &config.ports_attributes["3000"];
        assert_eq!(frontend.label.as_deref(), Some("Frontend"));
        assert_eq!(frontend.on_auto_forward, Some(OnPortForward::OpenBrowser));
        assert_eq!(
            config.ports_attributes["9000-9100"].protocol,
            Some(TunnelProtocol::Https)
        );
        assert_eq!(
            config.other_ports_attributes.unwrap().on_auto_forward,
            Some(OnPortForward::Silent)
        );
        assert_eq!(config.persistence.debounce, Duration::from_millis(1000));
    }

    #[test]
    fn test_persistence_overrides() {
        let toml = r#"
            [persistence]
            debounce = 250
        "#;
        let config: RemoteConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.persistence.debounce, Duration::from_millis(250));
        assert_eq!(config.persistence.mismatch_cooldown, Duration::from_secs(10));
        assert!(config.restore_forwarded_ports);
    }
}
