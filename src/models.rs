use serde::{Deserialize, Serialize};

/// Guard configuration
///
/// Both fields are deliberately left without defaults: a missing threshold
/// must fail configuration loading before any blocking action, since a
/// silently-zero threshold would block every observed peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Number of simultaneous connections from one address at which it is
    /// considered malicious (count >= threshold blocks)
    pub connection_threshold: u32,
    /// Name of the managed block rule in the packet filter
    pub rule_name: String,
}

/// Firewall backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// nftables table all managed objects live under
    pub table: String,
    /// Chain holding the drop rules
    pub chain: String,
}

/// Audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Path of the append-only blocked-address log
    pub log_path: String,
}

/// Geo-IP lookup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    /// Base URL of the CSV geo-IP endpoint; the address is appended as the
    /// last path segment
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Guard configuration
    pub guard: GuardConfig,
    /// Firewall backend configuration
    pub firewall: FirewallConfig,
    /// Audit log configuration
    pub audit: AuditConfig,
    /// Geo-IP lookup configuration
    pub geo: GeoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            guard: GuardConfig {
                connection_threshold: 100,
                rule_name: "netlock-blocklist".to_string(),
            },
            firewall: FirewallConfig {
                table: "netlock".to_string(),
                chain: "inbound".to_string(),
            },
            audit: AuditConfig {
                log_path: "blocked.log".to_string(),
            },
            geo: GeoConfig {
                base_url: "http://freegeoip.net/csv".to_string(),
                timeout_secs: 10,
            },
        }
    }
}

/// Geo-IP information for a single address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoInfo {
    /// Address the record describes
    pub ip: String,
    /// Country name
    pub country: String,
    /// Region name
    pub region: String,
    /// City name
    pub city: String,
}
