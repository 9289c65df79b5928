//! Interactive inspection shell.
//!
//! A blocking read-eval loop: each line is parsed into a `Command` and
//! dispatched synchronously. Dispatch is total over the grammar — commands
//! that are not implemented report so explicitly instead of crashing the
//! shell, and per-command errors are printed and the loop continues.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::net::IpAddr;
use thiserror::Error;

use crate::core::census::{sorted_by_count, take_census, ProcConnectionSource};
use crate::core::classifier::SelfAddressSet;
use crate::core::geo::GeoClient;
use crate::models::Config;

const PROMPT: &str = "netlock> ";

/// Errors from parsing one line of shell input
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '{0}', type 'help' for basic usage.")]
    Unknown(String),
    #[error("'{0}' needs an IP address argument.")]
    MissingArgument(&'static str),
    #[error("'{0}' is not a valid IP address.")]
    InvalidAddress(String),
}

/// One command of the shell grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    IsIn(IpAddr),
    Unblock(IpAddr),
    Block(IpAddr),
    Geo(IpAddr),
    GeoBlocked,
    Help,
    Exit,
}

impl Command {
    /// Name of the command when it is recognized but not implemented.
    fn unimplemented_name(&self) -> Option<&'static str> {
        match self {
            Command::IsIn(_) => Some("isin"),
            Command::Unblock(_) => Some("unblock"),
            Command::Block(_) => Some("block"),
            Command::GeoBlocked => Some("geoblocked"),
            _ => None,
        }
    }
}

/// Parse one input line. Blank input is `Ok(None)` and simply re-prompts.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(keyword) = words.next() else {
        return Ok(None);
    };
    let keyword = keyword.to_lowercase();

    let mut ip_arg = |name: &'static str| -> Result<IpAddr, CommandError> {
        let raw = words.next().ok_or(CommandError::MissingArgument(name))?;
        raw.parse()
            .map_err(|_| CommandError::InvalidAddress(raw.to_string()))
    };

    let command = match keyword.as_str() {
        "list" => Command::List,
        "isin" => Command::IsIn(ip_arg("isin")?),
        "unblock" => Command::Unblock(ip_arg("unblock")?),
        "block" => Command::Block(ip_arg("block")?),
        "geo" => Command::Geo(ip_arg("geo")?),
        "geoblocked" => Command::GeoBlocked,
        "help" => Command::Help,
        "exit" | "quit" => Command::Exit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// Render the census sorted by descending connection count.
pub fn render_census(census: &HashMap<IpAddr, u32>) -> String {
    let mut out = String::from("List of active connections by number:\n");
    for (addr, count) in sorted_by_count(census) {
        out.push_str(&format!("{}\t{}\n", count, addr));
    }
    out
}

fn help_text() -> &'static str {
    "Interactive shell commands overview.\n\n\
     list\t\tList all active connections sorted by their count from one IP.\n\
     isin {IP}\tFind if specified IP was blacklisted.\n\
     unblock {IP}\tDelete specified IP from the blocklist.\n\
     block {IP}\tAdd specified IP to the blocklist.\n\
     geo {IP}\tSearch for GEO-IP information about specified address.\n\
     geoblocked\tSearches GEO-IP info for all currently blocked addresses.\n"
}

/// Run the interactive shell until `exit`/`quit` or end of input.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    println!("netlock interactive shell\n");

    let geo = GeoClient::new(&config.geo);
    let stdin = io::stdin();

    loop {
        print!("{}", PROMPT);
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // end of input
        }

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}\n", e);
                continue;
            }
        };

        if let Some(name) = command.unimplemented_name() {
            println!("'{}' is not implemented yet.\n", name);
            continue;
        }

        match command {
            Command::List => {
                let source = ProcConnectionSource::new();
                let self_set = SelfAddressSet::detect();
                match take_census(&source, &self_set) {
                    Ok(census) => println!("{}", render_census(&census)),
                    Err(e) => println!("Census failed: {}\n", e),
                }
            }
            Command::Geo(addr) => match geo.lookup(addr).await {
                Ok(Some(info)) => println!(
                    "{}: {}, {}, {}\n",
                    info.ip, info.country, info.region, info.city
                ),
                Ok(None) => println!("No geo data for {}.\n", addr),
                Err(e) => println!("Geo lookup failed: {}\n", e),
            },
            Command::Help => println!("{}", help_text()),
            Command::Exit => {
                println!("Bye!");
                break;
            }
            // Unimplemented variants were answered above.
            _ => {}
        }
    }

    Ok(())
}
