//! Threshold selection.
//!
//! Applies the configured connection-count threshold to a census, returning
//! the addresses considered malicious for this run. Threshold validity is
//! enforced at configuration load, so by the time this runs the value is a
//! known-good integer.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// Select all addresses whose simultaneous-connection count meets or exceeds
/// `threshold`.
pub fn select_malicious(census: &HashMap<IpAddr, u32>, threshold: u32) -> HashSet<IpAddr> {
    census
        .iter()
        .filter(|(_, &count)| count >= threshold)
        .map(|(addr, _)| *addr)
        .collect()
}
