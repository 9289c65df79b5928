//! netlock
//!
//! This is the main entry point for the connection guard. One invocation
//! performs one census, one selection, and one reconciliation (`-s`), prints
//! the current census (`-l`), or drops into the interactive shell.

use anyhow::{bail, Context};
use dotenv::dotenv;
use log::{info, warn};
use std::env;

use netlock::audit::AuditLog;
use netlock::config;
use netlock::core::{
    reconcile, select_malicious, take_census, NftRuleStore, ProcConnectionSource, SelfAddressSet,
};
use netlock::shell;

enum Mode {
    Scan,
    List,
    Help,
    Shell,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    let mode = match env::args().nth(1).as_deref() {
        Some("-s") => Mode::Scan,
        Some("-l") => Mode::List,
        Some("-h") | Some("-help") => Mode::Help,
        Some(other) => {
            print_usage();
            bail!("unknown option '{}'", other);
        }
        None => Mode::Shell,
    };

    match mode {
        Mode::Help => {
            print_usage();
            Ok(())
        }
        Mode::List => run_list(),
        Mode::Scan => {
            let config = config::load_config().context("Failed to load configuration")?;
            run_scan(&config)
        }
        Mode::Shell => {
            let config = config::load_config().context("Failed to load configuration")?;
            shell::run(&config).await
        }
    }
}

fn print_usage() {
    println!("netlock v{}\n", env!("CARGO_PKG_VERSION"));
    println!("Usage: netlock [-s | -l | -h]");
    println!("\t-s\tSilently scan and block malicious connections.");
    println!("\t-l\tList all current connections sorted by connection number.");
    println!("\t-h\tPrint this usage overview.");
}

/// Print the current census sorted by descending connection count.
fn run_list() -> anyhow::Result<()> {
    let source = ProcConnectionSource::new();
    let self_set = SelfAddressSet::detect();
    let census = take_census(&source, &self_set)?;
    println!("{}", shell::render_census(&census));
    Ok(())
}

/// One silent scan-and-block pass: census, threshold selection, audit append,
/// rule reconciliation. The audit write and the rule write are independent
/// side effects; only census, config, and store failures are fatal.
fn run_scan(config: &netlock::models::Config) -> anyhow::Result<()> {
    info!("Starting scan-and-block pass...");

    let source = ProcConnectionSource::new();
    let self_set = SelfAddressSet::detect();
    let census = take_census(&source, &self_set)?;
    let selected = select_malicious(&census, config.guard.connection_threshold);

    if selected.is_empty() {
        info!(
            "No address reached {} simultaneous connections, nothing to block",
            config.guard.connection_threshold
        );
        return Ok(());
    }

    let audit = AuditLog::new(&config.audit.log_path);
    if let Err(e) = audit.record_blocked(selected.iter()) {
        warn!("Audit log write failed (continuing): {}", e);
    }

    let mut store = NftRuleStore::new(&config.firewall.table, &config.firewall.chain);
    reconcile(&mut store, &config.guard.rule_name, &selected)
        .context("Failed to update the block rule")?;

    Ok(())
}
