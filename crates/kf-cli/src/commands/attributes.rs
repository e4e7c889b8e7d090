//! Attributes command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use super::config::load_remote_config;
use kf_registry::PortsAttributes;

/// Resolve the configured attributes for a port and print them as JSON
pub fn attributes_command(
    config_path: Option<&PathBuf>,
    port: u16,
    host: &str,
    command_line: Option<&str>,
) -> Result<()> {
    let config = load_remote_config(config_path)?;
    let rules = PortsAttributes::from_config(&config);
    debug!("Loaded {} port attribute rules", rules.len());

    match rules.get_attributes(port, host, command_line) {
        Some(attributes) => {
            let json = serde_json::to_string_pretty(&attributes)
                .context("Failed to serialize attributes")?;
            println!("{}", json);
        }
        None => println!("No attributes"),
    }

    Ok(())
}
