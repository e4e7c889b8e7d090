//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::output::{print_error, print_info, print_success, print_warning};
use kf_core::config::{self, RemoteConfig};

fn resolve_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path.cloned().unwrap_or_else(config::default_config_path)
}

/// Load the remote configuration, falling back to defaults when the file is missing
pub fn load_remote_config(config_path: Option<&PathBuf>) -> Result<RemoteConfig> {
    let path = resolve_path(config_path);
    if !path.exists() {
        debug!("No config file at {:?}, using defaults", path);
        return Ok(RemoteConfig::default());
    }

    config::load_config(&path).with_context(|| format!("Failed to load config file: {:?}", path))
}

/// Print the configuration file path
pub fn config_path(config_path: Option<&PathBuf>) -> Result<()> {
    println!("{}", resolve_path(config_path).display());
    Ok(())
}

/// Show current configuration
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_path(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'k-forward config init' to create one");
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    // Surface parse errors here rather than on first use
    toml::from_str::<RemoteConfig>(&content)
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    println!("{}", content);
    Ok(())
}

/// Initialize default configuration
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let config_file = resolve_path(config_path);

    if let Some(config_dir) = config_file.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        create_dir(config_dir)?;
    }

    if config_file.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", config_file));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    std::fs::write(&config_file, generate_default_config())
        .with_context(|| format!("Failed to write config file: {:?}", config_file))?;

    print_success(&format!("Created configuration file: {:?}", config_file));
    Ok(())
}

fn create_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
        print_success(&format!("Created config directory: {:?}", config_dir));
    }
    Ok(())
}

/// Generate default configuration content
fn generate_default_config() -> String {
    r#"# k-Forward Configuration

# Persist forwarded ports and restore them on the next session
restore_forwarded_ports = true

[persistence]
# Quiet period before forwarded ports are written, in milliseconds
debounce = 1000
# Minimum time between two local port mismatch notices, in milliseconds
mismatch_cooldown = 10000
# Upper bound on one attributes provider query, in milliseconds
provider_timeout = 5000

# Attributes for ports that match no rule
# [other_ports_attributes]
# onAutoForward = "notify"

# Per-port rules. Keys are a port, a range ("9000-9100"), a host and
# port ("db:5432") or a regular expression matched against the command
# line of the process that opened the port.
# [ports_attributes."3000"]
# label = "Frontend"
# onAutoForward = "openBrowser"
# requireLocalPort = true
#
# [ports_attributes."9000-9100"]
# protocol = "https"
"#
    .to_string()
}
