//! netlock — host-level connection guard.
//!
//! Observes the machine's active inbound TCP connections, selects remote
//! peers exceeding a connection-count threshold, and grows a persistent
//! nftables block rule with them.

pub mod audit;
pub mod config;
pub mod core;
pub mod models;
pub mod shell;
