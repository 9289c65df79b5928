//! nftables rule store.
//!
//! Persists the managed block rule through the `nft` binary. All objects live
//! under a dedicated table so the system's existing ruleset is never touched:
//!
//! ```text
//! table inet netlock {
//!     set <name>_v4 { type ipv4_addr; elements = { ... } }
//!     set <name>_v6 { type ipv6_addr; elements = { ... } }
//!     chain inbound {
//!         type filter hook input priority 0; policy accept;
//!         ip saddr @<name>_v4 drop
//!         ip6 saddr @<name>_v6 drop
//!     }
//! }
//! ```
//!
//! Reads go through `nft -j list table`; every write is a single `nft -f -`
//! script, applied by nftables as one atomic transaction, so rule state is
//! never observable half-written.

use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::Write;
use std::net::IpAddr;
use std::process::{Command, Stdio};

use crate::core::reconciler::{join_addresses, RuleStore, StoreError, StoredRule};

const NFT_BIN: &str = "nft";

/// Rule store backed by nftables.
pub struct NftRuleStore {
    table: String,
    chain: String,
}

impl NftRuleStore {
    pub fn new(table: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            chain: chain.into(),
        }
    }

    fn set_names(&self, rule_name: &str) -> (String, String) {
        let base = sanitize_identifier(rule_name);
        (format!("{}_v4", base), format!("{}_v6", base))
    }

    fn write_rule(&self, rule: &StoredRule) -> Result<(), StoreError> {
        let script = build_sync_script(&self.table, &self.chain, rule, &self.set_names(&rule.name));
        debug!("Applying nft script:\n{}", script);
        run_nft_script(&script)
    }
}

impl RuleStore for NftRuleStore {
    fn get_rule(&self, name: &str) -> Result<Option<StoredRule>, StoreError> {
        let output = Command::new(NFT_BIN)
            .args(["-j", "list", "table", "inet", &self.table])
            .output()
            .map_err(|e| StoreError::Unavailable(format!("cannot run {}: {}", NFT_BIN, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // A missing table means the rule has never been created.
            if stderr.contains("No such file or directory") {
                return Ok(None);
            }
            return Err(StoreError::Command(format!(
                "nft list table exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_rule_from_listing(&stdout, name, &self.set_names(name))
    }

    fn add_rule(&mut self, rule: &StoredRule) -> Result<(), StoreError> {
        self.write_rule(rule)
    }

    fn update_rule(&mut self, rule: &StoredRule) -> Result<(), StoreError> {
        self.write_rule(rule)
    }
}

/// Map a rule name onto a valid nft identifier.
fn sanitize_identifier(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        ident.insert(0, 'r');
    }
    ident
}

/// Build the atomic script that brings nftables to the rule's state: declare
/// the scaffold, recreate the drop rules (the defensive reset), and replace
/// the set contents.
fn build_sync_script(
    table: &str,
    chain: &str,
    rule: &StoredRule,
    (set4, set6): &(String, String),
) -> String {
    let mut v4 = BTreeSet::new();
    let mut v6 = BTreeSet::new();
    for entry in rule.address_set() {
        match entry.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => {
                v4.insert(entry);
            }
            Ok(IpAddr::V6(_)) => {
                v6.insert(entry);
            }
            Err(_) => warn!(
                "Rule '{}' entry '{}' is not an address, nftables cannot hold it",
                rule.name, entry
            ),
        }
    }

    let mut script = String::new();
    script.push_str(&format!("add table inet {}\n", table));
    script.push_str(&format!(
        "add chain inet {} {} {{ type filter hook input priority 0 ; policy accept ; }}\n",
        table, chain
    ));
    script.push_str(&format!(
        "add set inet {} {} {{ type ipv4_addr ; comment \"{}\" ; }}\n",
        table, set4, rule.description
    ));
    script.push_str(&format!(
        "add set inet {} {} {{ type ipv6_addr ; comment \"{}\" ; }}\n",
        table, set6, rule.description
    ));
    script.push_str(&format!("flush chain inet {} {}\n", table, chain));
    script.push_str(&format!(
        "add rule inet {} {} ip saddr @{} drop\n",
        table, chain, set4
    ));
    script.push_str(&format!(
        "add rule inet {} {} ip6 saddr @{} drop\n",
        table, chain, set6
    ));
    script.push_str(&format!("flush set inet {} {}\n", table, set4));
    script.push_str(&format!("flush set inet {} {}\n", table, set6));
    if !v4.is_empty() {
        script.push_str(&format!(
            "add element inet {} {} {{ {} }}\n",
            table,
            set4,
            v4.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    if !v6.is_empty() {
        script.push_str(&format!(
            "add element inet {} {} {{ {} }}\n",
            table,
            set6,
            v6.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    script
}

/// Reconstruct the stored rule from `nft -j list table` output. Returns
/// `Ok(None)` when neither managed set exists in the table.
fn parse_rule_from_listing(
    json: &str,
    name: &str,
    (set4, set6): &(String, String),
) -> Result<Option<StoredRule>, StoreError> {
    let doc: Value = serde_json::from_str(json)
        .map_err(|e| StoreError::Malformed(format!("nft JSON output: {}", e)))?;
    let objects = doc
        .get("nftables")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Malformed("missing 'nftables' array".to_string()))?;

    let mut found = false;
    let mut addresses = BTreeSet::new();
    for object in objects {
        let Some(set) = object.get("set") else {
            continue;
        };
        let set_name = set.get("name").and_then(Value::as_str).unwrap_or_default();
        if set_name != set4.as_str() && set_name != set6.as_str() {
            continue;
        }
        found = true;
        if let Some(elems) = set.get("elem").and_then(Value::as_array) {
            for elem in elems {
                if let Some(addr) = elem.as_str() {
                    addresses.insert(addr.to_string());
                }
            }
        }
    }

    if !found {
        return Ok(None);
    }

    let mut rule = StoredRule::blocking(name, &BTreeSet::new());
    rule.remote_addresses = join_addresses(&addresses);
    Ok(Some(rule))
}

fn run_nft_script(script: &str) -> Result<(), StoreError> {
    let mut child = Command::new(NFT_BIN)
        .args(["-f", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| StoreError::Unavailable(format!("cannot run {}: {}", NFT_BIN, e)))?;

    child
        .stdin
        .take()
        .ok_or_else(|| StoreError::Unavailable("nft stdin not captured".to_string()))?
        .write_all(script.as_bytes())
        .map_err(|e| StoreError::Unavailable(format!("cannot write nft script: {}", e)))?;

    let output = child
        .wait_with_output()
        .map_err(|e| StoreError::Unavailable(format!("waiting for nft failed: {}", e)))?;

    if !output.status.success() {
        return Err(StoreError::Command(format!(
            "nft -f exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
