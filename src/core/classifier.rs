//! Self-address classification.
//!
//! Decides which observed endpoint addresses belong to this machine and must
//! never be counted as remote peers: every address the local hostname
//! resolves to, plus the fixed unspecified/loopback sentinels of both
//! families and the v4 "none" sentinel.

use log::warn;
use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};

/// The set of addresses considered local to the host.
///
/// Built fresh at the start of each census and never persisted. Membership is
/// canonical byte equality of `IpAddr`, so textually different renderings of
/// the same address (compressed v6 forms and the like) classify identically.
#[derive(Debug, Clone)]
pub struct SelfAddressSet {
    addrs: HashSet<IpAddr>,
}

impl SelfAddressSet {
    /// Fixed sentinel addresses that are always self.
    ///
    /// 255.255.255.255 is the v4 "no address" sentinel; no distinct v6
    /// counterpart exists since `::` already covers both the unspecified and
    /// "none" forms of that family.
    fn sentinels() -> [IpAddr; 5] {
        [
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::BROADCAST),
        ]
    }

    /// Detect the host's self-address set.
    ///
    /// Resolves the local hostname to all bound addresses and unions in the
    /// sentinels. Resolution failure is non-fatal: many minimal hosts cannot
    /// resolve their own name, and the census still works against the
    /// sentinel set alone.
    pub fn detect() -> Self {
        let mut addrs: HashSet<IpAddr> = Self::sentinels().into_iter().collect();

        match local_hostname() {
            Some(host) => match (host.as_str(), 0u16).to_socket_addrs() {
                Ok(resolved) => {
                    addrs.extend(resolved.map(|sock| sock.ip()));
                }
                Err(e) => warn!("Could not resolve local hostname '{}': {}", host, e),
            },
            None => warn!("Could not determine local hostname"),
        }

        Self { addrs }
    }

    /// Build a self-address set from explicit addresses plus the sentinels.
    pub fn with_local_addrs<I: IntoIterator<Item = IpAddr>>(local: I) -> Self {
        let mut addrs: HashSet<IpAddr> = Self::sentinels().into_iter().collect();
        addrs.extend(local);
        Self { addrs }
    }

    /// Whether `addr` belongs to this machine.
    pub fn is_self(&self, addr: &IpAddr) -> bool {
        self.addrs.contains(addr)
    }

    /// Filter an observed address stream down to genuine remote peers.
    pub fn filter_remote<'a, I>(&'a self, observed: I) -> impl Iterator<Item = IpAddr> + 'a
    where
        I: IntoIterator<Item = IpAddr> + 'a,
    {
        observed.into_iter().filter(move |addr| !self.is_self(addr))
    }
}

fn local_hostname() -> Option<String> {
    let host = fs::read_to_string("/proc/sys/kernel/hostname").ok()?;
    let host = host.trim().to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}
