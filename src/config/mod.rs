//! Configuration management for the guard.
//!
//! Configuration is layered from an optional TOML file and environment
//! variables; the connection threshold and rule name are required and are
//! validated here, before any blocking action can run.

use ::config::{Config as ConfigBuilder, Environment, File};
use std::env;
use thiserror::Error;

use crate::models::Config;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("Invalid configuration value: {0}")]
    Invalid(String),
}

/// Load configuration from the config file and environment variables
///
/// The file path defaults to `config/default.toml` and can be overridden
/// with `NETLOCK_CONFIG`. Environment variables use the `NETLOCK` prefix
/// with `__` separating nested keys, e.g.
/// `NETLOCK_GUARD__CONNECTION_THRESHOLD=50`.
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file =
        env::var("NETLOCK_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());

    let config = ConfigBuilder::builder()
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::with_prefix("NETLOCK").separator("__"))
        .set_default("firewall.table", "netlock")?
        .set_default("firewall.chain", "inbound")?
        .set_default("audit.log_path", "blocked.log")?
        .set_default("geo.base_url", "http://freegeoip.net/csv")?
        .set_default("geo.timeout_secs", 10)?
        .build()?;

    let config: Config = config.try_deserialize()?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.guard.rule_name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "guard.rule_name must not be empty".to_string(),
        ));
    }
    if config.firewall.table.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "firewall.table must not be empty".to_string(),
        ));
    }
    Ok(())
}
