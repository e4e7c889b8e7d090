//! Configuration rules for `ports_attributes`

use regex::Regex;
use tracing::warn;

use kf_core::address::{is_all_interfaces, is_localhost};
use kf_core::config::{ConfigStore, RemoteConfig};
use kf_core::Attributes;

/// What a `ports_attributes` key matches
#[derive(Debug, Clone)]
pub enum RuleKey {
    /// A single port on a local host (`"3000"`)
    ExactPort(u16),
    /// An inclusive port range on a local host (`"3000-3999"`)
    Range(u16, u16),
    /// A port on a named host (`"db:5432"`)
    HostPort(String, u16),
    /// A regular expression over the owning process command line
    Pattern(Regex),
}

impl RuleKey {
    /// Parse a configuration key, returning `None` for keys that match nothing
    pub fn parse(key: &str) -> Option<Self> {
        let trimmed = key.trim();

        if is_digits(trimmed) {
            return match trimmed.parse::<u16>() {
                Ok(port) if port != 0 => Some(RuleKey::ExactPort(port)),
                _ => None,
            };
        }

        if let Some((start, end)) = trimmed.split_once('-') {
            if is_digits(start) && is_digits(end) {
                return match (start.parse::<u16>(), end.parse::<u16>()) {
                    (Ok(start), Ok(end)) => Some(RuleKey::Range(start, end)),
                    _ => None,
                };
            }
        }

        if let Some((host, port)) = trimmed.split_once(':') {
            let host_ok = !host.is_empty()
                && host
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.');
            if host_ok && is_digits(port) && port.len() <= 5 {
                if let Ok(port) = port.parse::<u16>() {
                    return Some(RuleKey::HostPort(host.to_string(), port));
                }
            }
        }

        match Regex::new(key) {
            Ok(pattern) => Some(RuleKey::Pattern(pattern)),
            Err(e) => {
                warn!("Ignoring ports_attributes key {:?}: {}", key, e);
                None
            }
        }
    }

    fn sort_value(&self) -> u32 {
        match self {
            RuleKey::ExactPort(port) => u32::from(*port),
            RuleKey::Range(start, _) => u32::from(*start),
            RuleKey::HostPort(_, port) => u32::from(*port),
            RuleKey::Pattern(_) => u32::MAX,
        }
    }

    fn matches(&self, port: u16, host: &str, command_line: Option<&str>) -> bool {
        // Port-only keys describe local servers
        let remote_host = !is_localhost(host) && !is_all_interfaces(host);
        match self {
            RuleKey::ExactPort(p) => !remote_host && *p == port,
            RuleKey::Range(start, end) => !remote_host && (*start..=*end).contains(&port),
            RuleKey::HostPort(h, p) => h == host && *p == port,
            RuleKey::Pattern(pattern) => command_line.is_some_and(|line| pattern.is_match(line)),
        }
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// A parsed configuration rule
#[derive(Debug, Clone)]
pub struct PortRule {
    pub key: RuleKey,
    pub attributes: Attributes,
}

/// Ordered rule set built from the configuration
#[derive(Debug, Clone, Default)]
pub struct PortsAttributes {
    rules: Vec<PortRule>,
    default_attributes: Option<Attributes>,
}

impl PortsAttributes {
    /// Build the rule set from a configuration snapshot
    pub fn from_config(config: &RemoteConfig) -> Self {
        let mut attributes = Self::default();
        attributes.update(config);
        attributes
    }

    /// Re-read rules from a new configuration snapshot
    pub fn update(&mut self, config: &RemoteConfig) {
        let mut rules: Vec<PortRule> = config
            .ports_attributes
            .iter()
            .filter_map(|(key, attributes)| {
                RuleKey::parse(key).map(|key| PortRule {
                    key,
                    attributes: attributes.clone(),
                })
            })
            .collect();

        // Stable: equal start values keep configuration order
        rules.sort_by_key(|rule| rule.key.sort_value());

        self.rules = rules;
        self.default_attributes = config.other_ports_attributes.clone();
    }

    /// Number of usable rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve the attributes for a port
    ///
    /// An exact port rule overrides fields set by earlier rules; ranges, host
    /// rules and patterns only fill fields that are still unset. When no rule
    /// sets anything the `other_ports_attributes` fallback is returned.
    pub fn get_attributes(
        &self,
        port: u16,
        host: &str,
        command_line: Option<&str>,
    ) -> Option<Attributes> {
        let mut resolved = Attributes::default();

        for rule in self
            .rules
            .iter()
            .filter(|rule| rule.key.matches(port, host, command_line))
        {
            let found = &rule.attributes;
            if matches!(rule.key, RuleKey::ExactPort(_)) {
                resolved.on_auto_forward = found.on_auto_forward.or(resolved.on_auto_forward);
                resolved.elevate_if_needed = found.elevate_if_needed.or(resolved.elevate_if_needed);
                resolved.label = found.label.clone().or(resolved.label.take());
                resolved.require_local_port = found.require_local_port;
                resolved.protocol = found.protocol;
            } else {
                resolved.on_auto_forward = resolved.on_auto_forward.or(found.on_auto_forward);
                resolved.elevate_if_needed = resolved.elevate_if_needed.or(found.elevate_if_needed);
                resolved.label = resolved.label.take().or_else(|| found.label.clone());
                resolved.protocol = resolved.protocol.or(found.protocol);
            }
        }

        if resolved.is_empty() {
            self.default_attributes.clone()
        } else {
            Some(resolved)
        }
    }

    /// Merge `attributes` into the configuration entry for `port`
    ///
    /// Only fields set in `attributes` are written.
    pub fn add_attributes(config: &ConfigStore, port: u16, attributes: &Attributes) {
        config.update(|config| {
            let entry = config.ports_attributes.entry(port.to_string()).or_default();
            if attributes.label.is_some() {
                entry.label = attributes.label.clone();
            }
            if attributes.on_auto_forward.is_some() {
                entry.on_auto_forward = attributes.on_auto_forward;
            }
            if attributes.elevate_if_needed.is_some() {
                entry.elevate_if_needed = attributes.elevate_if_needed;
            }
            if attributes.require_local_port.is_some() {
                entry.require_local_port = attributes.require_local_port;
            }
            if attributes.protocol.is_some() {
                entry.protocol = attributes.protocol;
            }
        });
    }
}
