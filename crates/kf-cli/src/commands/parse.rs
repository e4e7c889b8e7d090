//! Parse command implementation

use anyhow::{bail, Result};
use serde::Serialize;

use crate::output::format_address;
use kf_core::address::{is_all_interfaces, is_localhost, parse_address};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParsedAddress {
    host: String,
    port: u16,
    key: String,
    localhost: bool,
    all_interfaces: bool,
}

/// Parse `host:port` or a bare port and print its parts
pub fn parse_command(address: &str, json: bool) -> Result<()> {
    let Some(parsed) = parse_address(address) else {
        bail!("Invalid address: {}", address);
    };

    if json {
        let output = ParsedAddress {
            key: parsed.key(),
            localhost: is_localhost(&parsed.host),
            all_interfaces: is_all_interfaces(&parsed.host),
            host: parsed.host,
            port: parsed.port,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", format_address(&parsed));
    }

    Ok(())
}
