//! Blocklist reconciliation.
//!
//! Merges a freshly selected set of malicious addresses into the persisted
//! block rule: fetch the rule by name, union its current address list with
//! the new addresses, and write the union back with the rule's defensive
//! fields re-asserted. Running the same reconciliation twice converges to the
//! same rule state, and previously blocked addresses are never dropped.

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::net::IpAddr;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Description stamped on the managed rule when it is created.
pub const RULE_DESCRIPTION: &str = "Rule managed by netlock to ban abusive remote peers";

/// Errors that can occur against the rule store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Rule store unavailable: {0}")]
    Unavailable(String),
    #[error("Rule store command failed: {0}")]
    Command(String),
    #[error("Malformed rule store response: {0}")]
    Malformed(String),
}

/// What the rule does to matching traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleAction {
    Block,
    Allow,
}

/// Traffic direction the rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleDirection {
    Inbound,
    Outbound,
}

/// A persisted packet-filter rule.
///
/// `remote_addresses` is a comma-joined string of address literals; that wire
/// form is the store's external contract. The address set itself is
/// order-independent: it is always rendered from a sorted set, so two rules
/// holding the same addresses serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRule {
    /// Rule name (the fixed identifier this tool manages)
    pub name: String,
    /// Rule description
    pub description: String,
    /// Rule action
    pub action: RuleAction,
    /// Traffic direction
    pub direction: RuleDirection,
    /// Whether the rule is enabled
    pub enabled: bool,
    /// Interfaces the rule applies to
    pub interfaces: String,
    /// Comma-joined blocked address literals
    pub remote_addresses: String,
}

impl StoredRule {
    /// Build the managed block rule over `addresses` with the four defensive
    /// fields set: action=block, direction=inbound, enabled, all interfaces.
    pub fn blocking(name: &str, addresses: &BTreeSet<String>) -> Self {
        Self {
            name: name.to_string(),
            description: RULE_DESCRIPTION.to_string(),
            action: RuleAction::Block,
            direction: RuleDirection::Inbound,
            enabled: true,
            interfaces: "all".to_string(),
            remote_addresses: join_addresses(addresses),
        }
    }

    /// Parse the comma-joined address list into a set.
    ///
    /// Entries are kept verbatim even when they do not parse as addresses, so
    /// a malformed rule never loses data across a rewrite; empty fragments
    /// from stray commas are dropped.
    pub fn address_set(&self) -> BTreeSet<String> {
        self.remote_addresses
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Render an address set in the comma-joined wire form.
pub fn join_addresses(addresses: &BTreeSet<String>) -> String {
    addresses.iter().cloned().collect::<Vec<_>>().join(",")
}

/// Persistence for the packet filter's rules.
///
/// A missing rule is `Ok(None)`, not an error; it triggers the create path.
#[cfg_attr(test, automock)]
pub trait RuleStore {
    fn get_rule(&self, name: &str) -> Result<Option<StoredRule>, StoreError>;
    fn add_rule(&mut self, rule: &StoredRule) -> Result<(), StoreError>;
    fn update_rule(&mut self, rule: &StoredRule) -> Result<(), StoreError>;
}

/// Merge `new_addresses` into the persisted block rule named `rule_name`.
///
/// An empty selection is a no-op and touches the store not at all. Store
/// failures other than "no such rule" propagate: the process must not report
/// success while the system-level filter was not actually updated.
pub fn reconcile(
    store: &mut dyn RuleStore,
    rule_name: &str,
    new_addresses: &HashSet<IpAddr>,
) -> Result<(), StoreError> {
    if new_addresses.is_empty() {
        return Ok(());
    }

    let mut union: BTreeSet<String> = new_addresses.iter().map(|addr| addr.to_string()).collect();

    match store.get_rule(rule_name)? {
        Some(existing) => {
            union.extend(existing.address_set());
            let rule = StoredRule::blocking(rule_name, &union);
            store.update_rule(&rule)?;
            info!(
                "Updated rule '{}': {} newly selected, {} total blocked",
                rule_name,
                new_addresses.len(),
                union.len()
            );
        }
        None => {
            let rule = StoredRule::blocking(rule_name, &union);
            store.add_rule(&rule)?;
            info!(
                "Created rule '{}' with {} blocked addresses",
                rule_name,
                union.len()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory rule store used to exercise reconciliation end to end.
    #[derive(Default)]
    struct InMemoryRuleStore {
        rules: HashMap<String, StoredRule>,
    }

    impl RuleStore for InMemoryRuleStore {
        fn get_rule(&self, name: &str) -> Result<Option<StoredRule>, StoreError> {
            Ok(self.rules.get(name).cloned())
        }

        fn add_rule(&mut self, rule: &StoredRule) -> Result<(), StoreError> {
            self.rules.insert(rule.name.clone(), rule.clone());
            Ok(())
        }

        fn update_rule(&mut self, rule: &StoredRule) -> Result<(), StoreError> {
            self.rules.insert(rule.name.clone(), rule.clone());
            Ok(())
        }
    }

    fn addrs(list: &[&str]) -> HashSet<IpAddr> {
        list.iter().map(|a| a.parse().unwrap()).collect()
    }

    #[test]
    fn creates_rule_with_defensive_fields_when_absent() {
        let mut store = InMemoryRuleStore::default();
        reconcile(&mut store, "guard", &addrs(&["203.0.113.9"])).unwrap();

        let rule = store.rules.get("guard").unwrap();
        assert_eq!(rule.remote_addresses, "203.0.113.9");
        assert_eq!(rule.action, RuleAction::Block);
        assert_eq!(rule.direction, RuleDirection::Inbound);
        assert!(rule.enabled);
        assert_eq!(rule.interfaces, "all");
        assert_eq!(rule.description, RULE_DESCRIPTION);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut store = InMemoryRuleStore::default();
        let selected = addrs(&["203.0.113.9", "2001:db8::1"]);

        reconcile(&mut store, "guard", &selected).unwrap();
        let first = store.rules.get("guard").unwrap().clone();

        reconcile(&mut store, "guard", &selected).unwrap();
        let second = store.rules.get("guard").unwrap().clone();

        assert_eq!(first, second);
    }

    #[test]
    fn disjoint_selections_accumulate() {
        let mut store = InMemoryRuleStore::default();
        reconcile(&mut store, "guard", &addrs(&["203.0.113.9"])).unwrap();
        reconcile(&mut store, "guard", &addrs(&["198.51.100.4"])).unwrap();

        let rule = store.rules.get("guard").unwrap();
        assert_eq!(
            rule.address_set(),
            ["198.51.100.4", "203.0.113.9"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        );
    }

    #[test]
    fn existing_addresses_survive_the_union() {
        // census {A:5, B:2, C:10} with threshold 5 selects {A, C}; a rule
        // already holding D ends up with {A, C, D}.
        let mut store = InMemoryRuleStore::default();
        let existing: BTreeSet<String> = ["10.4.4.4".to_string()].into_iter().collect();
        store
            .rules
            .insert("guard".to_string(), StoredRule::blocking("guard", &existing));

        reconcile(&mut store, "guard", &addrs(&["10.1.1.1", "10.3.3.3"])).unwrap();

        let rule = store.rules.get("guard").unwrap();
        assert_eq!(rule.remote_addresses, "10.1.1.1,10.3.3.3,10.4.4.4");
    }

    #[test]
    fn empty_selection_never_touches_the_store() {
        let mut store = MockRuleStore::new();
        store.expect_get_rule().never();
        store.expect_add_rule().never();
        store.expect_update_rule().never();

        reconcile(&mut store, "guard", &HashSet::new()).unwrap();
    }

    #[test]
    fn representation_is_order_independent() {
        let mut store_a = InMemoryRuleStore::default();
        let mut store_b = InMemoryRuleStore::default();

        reconcile(&mut store_a, "guard", &addrs(&["10.1.1.1"])).unwrap();
        reconcile(&mut store_a, "guard", &addrs(&["10.2.2.2"])).unwrap();
        reconcile(&mut store_b, "guard", &addrs(&["10.2.2.2"])).unwrap();
        reconcile(&mut store_b, "guard", &addrs(&["10.1.1.1"])).unwrap();

        assert_eq!(
            store_a.rules.get("guard").unwrap().remote_addresses,
            store_b.rules.get("guard").unwrap().remote_addresses
        );
    }

    #[test]
    fn tampered_rule_fields_are_reset_on_update() {
        let mut store = InMemoryRuleStore::default();
        let existing: BTreeSet<String> = ["10.4.4.4".to_string()].into_iter().collect();
        let mut tampered = StoredRule::blocking("guard", &existing);
        tampered.action = RuleAction::Allow;
        tampered.direction = RuleDirection::Outbound;
        tampered.enabled = false;
        store.rules.insert("guard".to_string(), tampered);

        reconcile(&mut store, "guard", &addrs(&["10.1.1.1"])).unwrap();

        let rule = store.rules.get("guard").unwrap();
        assert_eq!(rule.action, RuleAction::Block);
        assert_eq!(rule.direction, RuleDirection::Inbound);
        assert!(rule.enabled);
    }

    #[test]
    fn malformed_address_entries_are_carried_through() {
        let mut store = InMemoryRuleStore::default();
        let mut rule = StoredRule::blocking("guard", &BTreeSet::new());
        rule.remote_addresses = "not-an-address,, 10.4.4.4".to_string();
        store.rules.insert("guard".to_string(), rule);

        reconcile(&mut store, "guard", &addrs(&["10.1.1.1"])).unwrap();

        let rule = store.rules.get("guard").unwrap();
        assert_eq!(rule.remote_addresses, "10.1.1.1,10.4.4.4,not-an-address");
    }

    #[test]
    fn store_failure_propagates() {
        let mut store = MockRuleStore::new();
        store
            .expect_get_rule()
            .return_once(|_| Err(StoreError::Command("permission denied".to_string())));
        store.expect_add_rule().never();
        store.expect_update_rule().never();

        let result = reconcile(&mut store, "guard", &addrs(&["10.1.1.1"]));
        assert!(matches!(result, Err(StoreError::Command(_))));
    }
}
