//! Canonical address keys and host equivalence lookups
//!
//! Tunnels, candidates and in-flight forwards are all stored in maps keyed by
//! `"host:port"`. A remote process may report a different bind address than
//! the one a user or extension asked for (`127.0.0.1` vs `localhost`, `::` vs
//! `0.0.0.0`), so lookups probe every spelling in the host's equivalence
//! class before giving up.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use dashmap::DashMap;

use crate::types::RemoteAddress;

/// Spellings of the loopback host
pub const LOCALHOST_ADDRESSES: [&str; 4] = ["localhost", "127.0.0.1", "0:0:0:0:0:0:0:1", "::1"];

/// Spellings of the unspecified ("all interfaces") host
pub const ALL_INTERFACES_ADDRESSES: [&str; 3] = ["0.0.0.0", "0:0:0:0:0:0:0:0", "::"];

/// Whether `host` names the loopback interface
pub fn is_localhost(host: &str) -> bool {
    LOCALHOST_ADDRESSES.contains(&host)
}

/// Whether `host` names all interfaces
pub fn is_all_interfaces(host: &str) -> bool {
    ALL_INTERFACES_ADDRESSES.contains(&host)
}

/// Build the canonical `host:port` key
pub fn make_address(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

/// Parse `"host:port"` or a bare `"port"`
///
/// Host names may contain dots, hyphens and underscores. A missing host
/// defaults to `localhost`.
pub fn parse_address(address: &str) -> Option<RemoteAddress> {
    let (host, port) = match address.split_once(':') {
        Some((host, port)) => (host, port),
        None => ("", address),
    };

    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let port: u16 = port.parse().ok()?;

    if address.contains(':') && !is_valid_host(host) {
        return None;
    }

    let host = if host.is_empty() { "localhost" } else { host };
    Some(RemoteAddress::new(host, port))
}

fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && host.split('.').all(|label| {
            !label.is_empty()
                && label
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        })
}

/// Maps that can be probed by address key
pub trait AddressKeys {
    /// Whether `key` is present
    fn has_key(&self, key: &str) -> bool;
}

impl<T> AddressKeys for BTreeMap<String, T> {
    fn has_key(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}

impl<T, S: BuildHasher> AddressKeys for HashMap<String, T, S> {
    fn has_key(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}

impl<T, S: BuildHasher + Clone> AddressKeys for DashMap<String, T, S> {
    fn has_key(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}

/// Find the key under which `host:port` (or an equivalent spelling) is stored
///
/// Localhost variants probe the other localhost variants and all-interfaces
/// variants probe the other all-interfaces variants.
pub fn equivalent_key<M: AddressKeys + ?Sized>(map: &M, host: &str, port: u16) -> Option<String> {
    let initial = make_address(host, port);
    if map.has_key(&initial) {
        return Some(initial);
    }

    let candidates: &[&str] = if is_localhost(host) {
        &LOCALHOST_ADDRESSES
    } else if is_all_interfaces(host) {
        &ALL_INTERFACES_ADDRESSES
    } else {
        &[]
    };

    candidates
        .iter()
        .map(|test_host| make_address(test_host, port))
        .find(|key| map.has_key(key))
}

/// Like [`equivalent_key`], additionally cross-probing localhost and all
/// interfaces (a server bound to all interfaces is reachable via localhost)
pub fn equivalent_key_or_all_interfaces<M: AddressKeys + ?Sized>(
    map: &M,
    host: &str,
    port: u16,
) -> Option<String> {
    if let Some(key) = equivalent_key(map, host, port) {
        return Some(key);
    }

    let other_host = if is_all_interfaces(host) {
        Some("localhost")
    } else if is_localhost(host) {
        Some("0.0.0.0")
    } else {
        None
    };

    other_host.and_then(|other| equivalent_key(map, other, port))
}

/// Look up an entry by equivalence
pub fn map_has_address<'a, T>(map: &'a BTreeMap<String, T>, host: &str, port: u16) -> Option<&'a T> {
    equivalent_key_or_all_interfaces(map, host, port).and_then(|key| map.get(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(keys: &[&str]) -> BTreeMap<String, u32> {
        keys.iter()
            .enumerate()
            .map(|(i, k)| (k.to_string(), i as u32))
            .collect()
    }

    #[test]
    fn test_parse_host_and_port() {
        let parsed = parse_address("my-host.internal_net:8080").unwrap();
        assert_eq!(parsed.host, "my-host.internal_net");
        assert_eq!(parsed.port, 8080);
    }

    #[test]
    fn test_parse_bare_port_defaults_to_localhost() {
        let parsed = parse_address("3000").unwrap();
        assert_eq!(parsed.host, "localhost");
        assert_eq!(parsed.port, 3000);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_address("").is_none());
        assert!(parse_address("host:").is_none());
        assert!(parse_address(":80").is_none());
        assert!(parse_address("a..b:80").is_none());
        assert!(parse_address("::1:80").is_none());
        assert!(parse_address("host:99999").is_none());
        assert!(parse_address("host:8o").is_none());
    }

    #[test]
    fn test_localhost_variants_are_equivalent() {
        let map = map_with(&["127.0.0.1:3000"]);
        assert_eq!(
            equivalent_key(&map, "localhost", 3000).as_deref(),
            Some("127.0.0.1:3000")
        );
        assert_eq!(
            equivalent_key(&map, "::1", 3000).as_deref(),
            Some("127.0.0.1:3000")
        );
        assert!(equivalent_key(&map, "localhost", 3001).is_none());
    }

    #[test]
    fn test_all_interfaces_variants_are_equivalent() {
        let map = map_with(&["::4000", "0:0:0:0:0:0:0:0:4000"]);
        assert_eq!(
            equivalent_key(&map, "0.0.0.0", 4000).as_deref(),
            Some("0:0:0:0:0:0:0:0:4000")
        );
    }

    #[test]
    fn test_other_hosts_only_match_exactly() {
        let map = map_with(&["localhost:5000"]);
        assert!(equivalent_key(&map, "example.com", 5000).is_none());
        assert!(equivalent_key_or_all_interfaces(&map, "example.com", 5000).is_none());
    }

    #[test]
    fn test_all_interfaces_falls_back_to_localhost() {
        let map = map_with(&["localhost:8080"]);
        assert!(equivalent_key(&map, "0.0.0.0", 8080).is_none());
        assert_eq!(
            equivalent_key_or_all_interfaces(&map, "0.0.0.0", 8080).as_deref(),
            Some("localhost:8080")
        );
    }

    #[test]
    fn test_localhost_falls_back_to_all_interfaces() {
        let map = map_with(&["0.0.0.0:8080"]);
        assert_eq!(map_has_address(&map, "127.0.0.1", 8080), Some(&0));
    }

    #[test]
    fn test_dashmap_keys() {
        let map: DashMap<String, ()> = DashMap::new();
        map.insert("::1:9000".to_string(), ());
        assert_eq!(
            equivalent_key(&map, "localhost", 9000).as_deref(),
            Some("::1:9000")
        );
    }
}
