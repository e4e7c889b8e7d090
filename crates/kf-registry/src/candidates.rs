//! Candidate port reconciliation

use std::collections::BTreeMap;

use kf_core::address::{equivalent_key_or_all_interfaces, make_address};
use kf_core::{CandidatePort, RemoteAddress, Tunnel};

/// Key a candidate snapshot by canonical address
pub fn index_candidates(candidates: Vec<CandidatePort>) -> BTreeMap<String, CandidatePort> {
    candidates
        .into_iter()
        .map(|candidate| (make_address(&candidate.host, candidate.port), candidate))
        .collect()
}

/// Apply a new candidate snapshot to the tunnel maps
///
/// Tunnels matching a current candidate pick up its process details.
/// Tunnels whose candidate vanished lose them, unless an equivalent
/// candidate is still present. Returns the addresses that were in
/// `previous` but not in `current`.
pub fn reconcile(
    previous: Option<&BTreeMap<String, CandidatePort>>,
    current: &BTreeMap<String, CandidatePort>,
    forwarded: &mut BTreeMap<String, Tunnel>,
    detected: &mut BTreeMap<String, Tunnel>,
) -> BTreeMap<String, RemoteAddress> {
    for candidate in current.values() {
        for tunnels in [&mut *forwarded, &mut *detected] {
            if let Some(key) = equivalent_key_or_all_interfaces(&*tunnels, &candidate.host, candidate.port) {
                if let Some(tunnel) = tunnels.get_mut(&key) {
                    tunnel.set_process(Some(candidate));
                }
            }
        }
    }

    let removed: BTreeMap<String, RemoteAddress> = previous
        .into_iter()
        .flat_map(|previous| previous.iter())
        .filter(|(key, _)| !current.contains_key(*key))
        .map(|(key, candidate)| (key.clone(), candidate.address()))
        .collect();

    for address in removed.values() {
        for tunnels in [&mut *forwarded, &mut *detected] {
            let Some(key) = equivalent_key_or_all_interfaces(&*tunnels, &address.host, address.port) else {
                continue;
            };
            let Some(tunnel) = tunnels.get_mut(&key) else {
                continue;
            };
            if equivalent_key_or_all_interfaces(current, &tunnel.remote_host, tunnel.remote_port)
                .is_none()
            {
                tunnel.set_process(None);
            }
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_core::{Privacy, SourceInfo, TunnelProtocol};

    fn tunnel(host: &str, port: u16) -> Tunnel {
        Tunnel {
            remote_host: host.to_string(),
            remote_port: port,
            local_address: format!("localhost:{port}"),
            local_port: Some(port),
            protocol: TunnelProtocol::Http,
            name: None,
            closeable: true,
            privacy: Privacy::private(),
            running_process: None,
            has_running_process: false,
            pid: None,
            source: SourceInfo::auto(),
        }
    }

    fn tunnels(entries: &[(&str, u16)]) -> BTreeMap<String, Tunnel> {
        entries
            .iter()
            .map(|(host, port)| (make_address(host, *port), tunnel(host, *port)))
            .collect()
    }

    #[test]
    fn test_candidates_annotate_equivalent_tunnels() {
        let mut forwarded = tunnels(&[("localhost", 3000)]);
        let mut detected = BTreeMap::new();
        let current = index_candidates(vec![
            CandidatePort::new("0.0.0.0", 3000).with_process("node server.js", 42)
        ]);

        let removed = reconcile(None, &current, &mut forwarded, &mut detected);

        assert!(removed.is_empty());
        let tunnel = &forwarded["localhost:3000"];
        assert_eq!(tunnel.pid, Some(42));
        assert_eq!(tunnel.running_process.as_deref(), Some("node server.js"));
        assert!(tunnel.has_running_process);
    }

    #[test]
    fn test_vanished_candidate_clears_process() {
        let mut forwarded = tunnels(&[("localhost", 3000)]);
        let mut detected = tunnels(&[("localhost", 9229)]);
        let previous = index_candidates(vec![
            CandidatePort::new("localhost", 3000).with_process("node server.js", 42),
            CandidatePort::new("localhost", 9229).with_process("node --inspect", 43),
        ]);
        reconcile(None, &previous, &mut forwarded, &mut detected);

        let current = index_candidates(vec![
            CandidatePort::new("localhost", 9229).with_process("node --inspect", 43)
        ]);
        let removed = reconcile(Some(&previous), &current, &mut forwarded, &mut detected);

        assert_eq!(removed.len(), 1);
        assert_eq!(removed["localhost:3000"], RemoteAddress::new("localhost", 3000));
        assert_eq!(forwarded["localhost:3000"].pid, None);
        assert!(!forwarded["localhost:3000"].has_running_process);
        assert_eq!(detected["localhost:9229"].pid, Some(43));
    }

    #[test]
    fn test_rebound_candidate_keeps_process() {
        let mut forwarded = tunnels(&[("localhost", 8080)]);
        let mut detected = BTreeMap::new();
        let previous = index_candidates(vec![
            CandidatePort::new("127.0.0.1", 8080).with_process("python -m http.server", 7)
        ]);
        reconcile(None, &previous, &mut forwarded, &mut detected);

        let current = index_candidates(vec![
            CandidatePort::new("0.0.0.0", 8080).with_process("python -m http.server", 8)
        ]);
        let removed = reconcile(Some(&previous), &current, &mut forwarded, &mut detected);

        assert!(removed.contains_key("127.0.0.1:8080"));
        assert_eq!(forwarded["localhost:8080"].pid, Some(8));
    }
}
