//! Core functionality of the guard.
//!
//! This module contains the connection census, self-address classification,
//! threshold selection, and blocklist reconciliation, plus the nftables rule
//! store and the geo-IP client.

pub mod census;
pub mod classifier;
pub mod firewall;
pub mod geo;
pub mod reconciler;
pub mod selector;

pub use census::{take_census, CensusError, ConnectionSource, ProcConnectionSource};
pub use classifier::SelfAddressSet;
pub use firewall::NftRuleStore;
pub use geo::GeoClient;
pub use reconciler::{reconcile, RuleStore, StoreError, StoredRule};
pub use selector::select_malicious;
