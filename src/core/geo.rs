//! Geo-IP lookup client.
//!
//! Fetches a comma-separated geo record for one address from the configured
//! CSV endpoint. Lookups are best-effort: failures and malformed responses
//! are non-fatal and yield an absent result for that one address only.

use reqwest::Client;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

use crate::models::{GeoConfig, GeoInfo};

/// Number of fields in a well-formed geo record.
const GEO_RECORD_FIELDS: usize = 11;

const USER_AGENT: &str = concat!("netlock/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur during a geo lookup
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("Geo request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Geo-IP lookup client
pub struct GeoClient {
    client: Client,
    base_url: String,
}

impl GeoClient {
    /// Create a new geo client instance
    pub fn new(config: &GeoConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Look up geo information for one address
    ///
    /// # Returns
    ///
    /// * `Ok(Some(info))` for a well-formed record
    /// * `Ok(None)` when the service returned no usable data
    /// * `Err(GeoError)` when the request itself failed
    pub async fn lookup(&self, address: IpAddr) -> Result<Option<GeoInfo>, GeoError> {
        let url = format!("{}/{}", self.base_url, address);
        let body = self.client.get(&url).send().await?.text().await?;
        Ok(parse_geo_record(&body))
    }
}

/// Parse the service's CSV record. Only fields 0 (ip), 2 (country), 4
/// (region) and 5 (city) are consumed; any response that is not exactly 11
/// fields yields no data.
fn parse_geo_record(record: &str) -> Option<GeoInfo> {
    let fields: Vec<&str> = record.trim_end().split(',').collect();
    if fields.len() != GEO_RECORD_FIELDS {
        return None;
    }
    Some(GeoInfo {
        ip: fields[0].to_string(),
        country: fields[2].to_string(),
        region: fields[4].to_string(),
        city: fields[5].to_string(),
    })
}
