//! Audit log of block events.
//!
//! Append-only sink: one `<timestamp>\t<address>` line per blocked address.
//! The audit write and the firewall rule write are independent side effects
//! of the same selection; a failure here never blocks reconciliation.

use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::PathBuf;

/// Append-only audit log
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one line per address, stamped with the current local time.
    pub fn record_blocked<'a, I>(&self, addresses: I) -> io::Result<()>
    where
        I: IntoIterator<Item = &'a IpAddr>,
    {
        let now = Local::now();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for addr in addresses {
            file.write_all(format_entry(&now, addr).as_bytes())?;
        }
        Ok(())
    }
}

fn format_entry(timestamp: &DateTime<Local>, addr: &IpAddr) -> String {
    format!("{}\t{}\n", timestamp.format("%Y-%m-%d %H:%M:%S"), addr)
}
