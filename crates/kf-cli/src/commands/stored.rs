//! Stored and forget command implementations

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::output::{format_tunnels, print_info, print_success, print_warning};
use kf_core::config::default_storage_path;
use kf_core::storage::FileStorage;
use kf_core::traits::Storage;
use kf_registry::persistence::parse_tunnels;
use kf_registry::storage_key;

fn open_storage(storage_path: Option<&PathBuf>) -> Result<FileStorage> {
    let path = storage_path.cloned().unwrap_or_else(default_storage_path);
    debug!("Opening storage at {:?}", path);
    FileStorage::open(&path).with_context(|| format!("Failed to open storage: {:?}", path))
}

fn key_for(authority: Option<&str>, workspace: &str) -> Result<String> {
    storage_key(authority, Some(workspace))
        .with_context(|| format!("Cannot derive a storage key for workspace {}", workspace))
}

/// Print the forwarded ports persisted for an authority and workspace
pub fn stored_command(
    storage_path: Option<&PathBuf>,
    authority: Option<&str>,
    workspace: &str,
    long: bool,
) -> Result<()> {
    let storage = open_storage(storage_path)?;
    let key = key_for(authority, workspace)?;

    let tunnels = match storage.get(&key) {
        Some(value) => parse_tunnels(&value),
        None => Vec::new(),
    };

    if long {
        print_info(&format!("Storage key: {}", key));
    }
    println!("Stored Forwarded Ports:");
    println!("{}", format_tunnels(&tunnels, long));

    Ok(())
}

/// Remove the forwarded ports persisted for an authority and workspace
pub fn forget_command(
    storage_path: Option<&PathBuf>,
    authority: Option<&str>,
    workspace: &str,
) -> Result<()> {
    let storage = open_storage(storage_path)?;
    let key = key_for(authority, workspace)?;

    if storage.get(&key).is_none() {
        print_warning(&format!("Nothing stored for {}", workspace));
        return Ok(());
    }

    storage
        .remove(&key)
        .with_context(|| format!("Failed to remove {}", key))?;
    print_success(&format!("Forgot forwarded ports for {}", workspace));
    Ok(())
}
