//! Config rules merged with runtime attribute providers

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use kf_core::address::{equivalent_key_or_all_interfaces, LOCALHOST_ADDRESSES};
use kf_core::config::ConfigStore;
use kf_core::traits::PortAttributesProvider;
use kf_core::types::ProvidedPortAttributes;
use kf_core::{Attributes, CandidatePort, OnPortForward, RemoteAddress};

use super::rules::PortsAttributes;

/// Ports owned by one process, queried as a single provider batch
struct ProviderBatch {
    provider: Arc<dyn PortAttributesProvider>,
    pid: Option<u32>,
    ports: Vec<u16>,
    command_line: Option<String>,
}

/// Resolves effective attributes for sets of ports
pub struct AttributesResolver {
    config: Arc<ConfigStore>,
    rules: RwLock<PortsAttributes>,
    providers: RwLock<Vec<Arc<dyn PortAttributesProvider>>>,
}

impl AttributesResolver {
    /// Create a resolver reading rules from `config`
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let rules = PortsAttributes::from_config(&config.current());
        Self {
            config,
            rules: RwLock::new(rules),
            providers: RwLock::new(Vec::new()),
        }
    }

    /// Re-read the rules after a configuration change
    pub async fn reload(&self) {
        let config = self.config.current();
        self.rules.write().await.update(&config);
        debug!("Reloaded {} port attribute rules", self.rules.read().await.len());
    }

    /// Register a runtime provider
    pub async fn add_provider(&self, provider: Arc<dyn PortAttributesProvider>) {
        self.providers.write().await.push(provider);
    }

    /// Number of registered providers
    pub async fn provider_count(&self) -> usize {
        self.providers.read().await.len()
    }

    /// Config-only attributes for a single port
    pub async fn config_attributes(
        &self,
        port: u16,
        host: &str,
        command_line: Option<&str>,
    ) -> Option<Attributes> {
        self.rules.read().await.get_attributes(port, host, command_line)
    }

    /// Resolve attributes for `ports`
    ///
    /// Process details come from `candidates`. With `check_providers` set,
    /// every provider is asked once per owning process; provider answers only
    /// fill `on_auto_forward` where configuration left it unset. Ports that
    /// end up with no attributes are omitted, and `None` is returned when no
    /// port has any.
    pub async fn get_attributes(
        &self,
        ports: &[RemoteAddress],
        candidates: &BTreeMap<String, CandidatePort>,
        check_providers: bool,
    ) -> Option<HashMap<u16, Attributes>> {
        let mut command_lines: HashMap<u16, Option<String>> = HashMap::new();
        let mut pid_groups: BTreeMap<Option<u32>, Vec<u16>> = BTreeMap::new();

        for address in ports {
            let candidate =
                equivalent_key_or_all_interfaces(candidates, LOCALHOST_ADDRESSES[0], address.port)
                    .and_then(|key| candidates.get(&key));
            let pid = candidate.and_then(|c| c.pid);
            command_lines.insert(address.port, candidate.and_then(|c| c.detail.clone()));
            pid_groups.entry(pid).or_default().push(address.port);
        }

        let mut config_attributes: HashMap<u16, Attributes> = HashMap::new();
        {
            let rules = self.rules.read().await;
            for address in ports {
                let command_line = command_lines.get(&address.port).and_then(|c| c.as_deref());
                if let Some(attributes) =
                    rules.get_attributes(address.port, &address.host, command_line)
                {
                    config_attributes.insert(address.port, attributes);
                }
            }
        }

        let providers = self.providers.read().await.clone();
        if providers.is_empty() || !check_providers {
            return (!config_attributes.is_empty()).then_some(config_attributes);
        }

        let mut batches = Vec::with_capacity(providers.len() * pid_groups.len());
        for provider in &providers {
            for (pid, group) in &pid_groups {
                batches.push(ProviderBatch {
                    provider: Arc::clone(provider),
                    pid: *pid,
                    command_line: group
                        .first()
                        .and_then(|port| command_lines.get(port).cloned().flatten()),
                    ports: group.clone(),
                });
            }
        }

        let timeout = self.config.persistence().provider_timeout;
        let results = join_all(batches.iter().map(|batch| query_provider(batch, timeout))).await;

        let mut provided: HashMap<u16, ProvidedPortAttributes> = HashMap::new();
        for attributes in results.into_iter().flatten() {
            provided.insert(attributes.port, attributes);
        }

        let mut merged: HashMap<u16, Attributes> = HashMap::new();
        for address in ports {
            let config = config_attributes.get(&address.port);
            let provided_action: Option<OnPortForward> = provided
                .get(&address.port)
                .and_then(|p| p.auto_forward_action)
                .map(Into::into);

            let attributes = Attributes {
                label: config.and_then(|c| c.label.clone()),
                on_auto_forward: config.and_then(|c| c.on_auto_forward).or(provided_action),
                elevate_if_needed: config.and_then(|c| c.elevate_if_needed),
                require_local_port: config.and_then(|c| c.require_local_port),
                protocol: config.and_then(|c| c.protocol),
            };
            if !attributes.is_empty() {
                merged.insert(address.port, attributes);
            }
        }

        (!merged.is_empty()).then_some(merged)
    }
}

async fn query_provider(batch: &ProviderBatch, timeout: Duration) -> Vec<ProvidedPortAttributes> {
    let cancel = CancellationToken::new();
    let query = batch.provider.provide_port_attributes(
        &batch.ports,
        batch.pid,
        batch.command_line.as_deref(),
        cancel.clone(),
    );

    match tokio::time::timeout(timeout, query).await {
        Ok(attributes) => attributes,
        Err(_) => {
            cancel.cancel();
            warn!(
                "Port attributes provider timed out after {:?} for ports {:?}",
                timeout, batch.ports
            );
            Vec::new()
        }
    }
}
