//! Connection census.
//!
//! Takes one point-in-time snapshot of the host's established inbound TCP
//! connections and counts simultaneous connections per remote peer, with the
//! host's own addresses excluded through the classifier. The OS connection
//! table is reached through the `ConnectionSource` seam so the census logic
//! can be exercised against in-memory fakes.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

use crate::core::classifier::SelfAddressSet;

#[cfg(test)]
use mockall::automock;

/// TCP state code for established connections in /proc/net/tcp format.
const TCP_ESTABLISHED: u8 = 0x01;

/// Errors that can occur while taking a census
#[derive(Debug, Error)]
pub enum CensusError {
    #[error("Cannot read connection table: {0}")]
    Io(#[from] io::Error),
}

/// Source of the host's active TCP connection table.
///
/// One call is one snapshot; the census never retries a failed read.
#[cfg_attr(test, automock)]
pub trait ConnectionSource {
    /// Remote endpoint address of every currently established TCP connection.
    fn remote_peers(&self) -> Result<Vec<IpAddr>, CensusError>;
}

/// Connection source backed by /proc/net/tcp and /proc/net/tcp6.
pub struct ProcConnectionSource {
    tcp_path: String,
    tcp6_path: String,
}

impl ProcConnectionSource {
    pub fn new() -> Self {
        Self {
            tcp_path: "/proc/net/tcp".to_string(),
            tcp6_path: "/proc/net/tcp6".to_string(),
        }
    }

    /// Read from explicit table paths instead of /proc.
    pub fn with_paths(tcp_path: impl Into<String>, tcp6_path: impl Into<String>) -> Self {
        Self {
            tcp_path: tcp_path.into(),
            tcp6_path: tcp6_path.into(),
        }
    }

    fn read_table(path: &str, peers: &mut Vec<IpAddr>) -> Result<(), CensusError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        for (line_num, line) in reader.lines().enumerate() {
            if line_num == 0 {
                continue; // header
            }
            let line = line?;
            if let Some(addr) = parse_established_remote(&line) {
                peers.push(addr);
            }
        }
        Ok(())
    }
}

impl Default for ProcConnectionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionSource for ProcConnectionSource {
    fn remote_peers(&self) -> Result<Vec<IpAddr>, CensusError> {
        let mut peers = Vec::new();
        Self::read_table(&self.tcp_path, &mut peers)?;
        // Hosts without IPv6 have no tcp6 table at all.
        match Self::read_table(&self.tcp6_path, &mut peers) {
            Ok(()) => {}
            Err(CensusError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(peers)
    }
}

/// Parse one /proc/net/tcp{,6} line, returning the remote address of
/// established entries. Malformed lines and other states yield `None`.
fn parse_established_remote(line: &str) -> Option<IpAddr> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }

    // State first: most lines are listeners or waiters and can be skipped
    // without parsing addresses.
    let state = u8::from_str_radix(fields[3], 16).ok()?;
    if state != TCP_ESTABLISHED {
        return None;
    }

    let (remote_hex, _port_hex) = fields[2].split_once(':')?;
    parse_hex_addr(remote_hex)
}

/// Parse a kernel hex address: 8 digits for v4, 32 for v6. Each 32-bit word
/// is printed in native (little-endian) byte order.
fn parse_hex_addr(hex: &str) -> Option<IpAddr> {
    match hex.len() {
        8 => {
            let word = u32::from_str_radix(hex, 16).ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(word.to_le_bytes())))
        }
        32 => {
            let mut bytes = [0u8; 16];
            for (i, chunk) in hex.as_bytes().chunks(8).enumerate() {
                let chunk = std::str::from_utf8(chunk).ok()?;
                let word = u32::from_str_radix(chunk, 16).ok()?;
                bytes[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
            }
            Some(IpAddr::V6(Ipv6Addr::from(bytes)))
        }
        _ => None,
    }
}

/// Take one census: snapshot the connection table, drop self addresses, and
/// count simultaneous connections per remaining remote peer.
pub fn take_census(
    source: &dyn ConnectionSource,
    self_set: &SelfAddressSet,
) -> Result<HashMap<IpAddr, u32>, CensusError> {
    let observed = source.remote_peers()?;
    let mut counts: HashMap<IpAddr, u32> = HashMap::new();
    for addr in self_set.filter_remote(observed) {
        *counts.entry(addr).or_insert(0) += 1;
    }
    Ok(counts)
}

/// Order a census by descending connection count, address as tie-breaker so
/// the listing is deterministic.
pub fn sorted_by_count(census: &HashMap<IpAddr, u32>) -> Vec<(IpAddr, u32)> {
    let mut entries: Vec<(IpAddr, u32)> = census.iter().map(|(a, c)| (*a, *c)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const V4_ESTABLISHED: &str =
        "   1: 0100007F:0050 097100CB:C350 01 00000000:00000000 00:00000000 00000000     0        0 12345 1 0000000000000000 20 4 30 10 -1";
    const V4_LISTEN: &str =
        "   0: 00000000:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 12340 1 0000000000000000 100 0 0 10 0";
    const V6_ESTABLISHED: &str =
        "   2: 00000000000000000000000001000000:1F90 B80D0120000000000000000001000000:A1B2 01 00000000:00000000 00:00000000 00000000     0        0 22345 1 0000000000000000 20 4 30 10 -1";

    #[test]
    fn parses_established_v4_remote() {
        let addr = parse_established_remote(V4_ESTABLISHED).unwrap();
        assert_eq!(addr, "203.0.113.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn parses_established_v6_remote() {
        let addr = parse_established_remote(V6_ESTABLISHED).unwrap();
        assert_eq!(addr, "2001:db8::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn skips_non_established_states() {
        assert!(parse_established_remote(V4_LISTEN).is_none());
    }

    #[test]
    fn skips_malformed_lines() {
        assert!(parse_established_remote("garbage").is_none());
        assert!(parse_established_remote("  sl  local_address rem_address   st").is_none());
    }

    #[test]
    fn proc_source_reads_both_tables() {
        let dir = std::env::temp_dir().join(format!("netlock-census-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let tcp = dir.join("tcp");
        let tcp6 = dir.join("tcp6");
        std::fs::write(
            &tcp,
            format!("  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n{}\n{}\n", V4_ESTABLISHED, V4_LISTEN),
        )
        .unwrap();
        std::fs::write(
            &tcp6,
            format!("  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n{}\n", V6_ESTABLISHED),
        )
        .unwrap();

        let source =
            ProcConnectionSource::with_paths(tcp.to_str().unwrap(), tcp6.to_str().unwrap());
        let peers = source.remote_peers().unwrap();
        assert_eq!(
            peers,
            vec![
                "203.0.113.9".parse::<IpAddr>().unwrap(),
                "2001:db8::1".parse().unwrap()
            ]
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_tcp6_table_is_not_an_error() {
        let dir = std::env::temp_dir().join(format!("netlock-census6-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let tcp = dir.join("tcp");
        std::fs::write(&tcp, format!("header\n{}\n", V4_ESTABLISHED)).unwrap();

        let source = ProcConnectionSource::with_paths(
            tcp.to_str().unwrap(),
            dir.join("missing-tcp6").to_str().unwrap(),
        );
        assert_eq!(source.remote_peers().unwrap().len(), 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unreadable_table_propagates_an_error() {
        let source = ProcConnectionSource::with_paths("/nonexistent/tcp", "/nonexistent/tcp6");
        assert!(matches!(source.remote_peers(), Err(CensusError::Io(_))));
    }

    #[test]
    fn census_counts_per_peer_and_excludes_self() {
        let peer_a: IpAddr = "203.0.113.9".parse().unwrap();
        let peer_b: IpAddr = "198.51.100.4".parse().unwrap();
        let bound: IpAddr = "10.0.0.2".parse().unwrap();

        let mut source = MockConnectionSource::new();
        source.expect_remote_peers().return_once(move || {
            Ok(vec![
                peer_a,
                "127.0.0.1".parse().unwrap(),
                peer_a,
                bound,
                peer_b,
                peer_a,
            ])
        });

        let self_set = SelfAddressSet::with_local_addrs([bound]);
        let census = take_census(&source, &self_set).unwrap();

        assert_eq!(census.len(), 2);
        assert_eq!(census[&peer_a], 3);
        assert_eq!(census[&peer_b], 1);
    }

    #[test]
    fn census_propagates_source_failure() {
        let mut source = MockConnectionSource::new();
        source.expect_remote_peers().return_once(|| {
            Err(CensusError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "denied",
            )))
        });
        let self_set = SelfAddressSet::with_local_addrs([]);
        assert!(take_census(&source, &self_set).is_err());
    }
}
