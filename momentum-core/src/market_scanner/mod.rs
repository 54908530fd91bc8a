use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

pub mod aggregator;
pub mod data_feeds;
pub mod endpoints;
pub mod normalizers;
pub mod scanner;

pub use aggregator::{Aggregator, Snapshot};
pub use data_feeds::{fetch_all, EndpointSource, HttpFetcher};
pub use endpoints::{Endpoint, ShapeTag, DEFAULT_ENDPOINTS};
pub use normalizers::Normalizer;
pub use scanner::{CycleReport, MarketScanner};

/// A normalized token record in the momentum window.
///
/// Serialized with the camelCase field names subscribers expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub price_change_24h: f64,
    pub volume_24h: f64,
    pub chain: String,
    /// Capture time, fractional Unix seconds
    pub timestamp: f64,
}

impl Token {
    /// Snapshot key. Two records with the same key are the same token.
    pub fn key(&self) -> String {
        format!("{}-{}", self.chain, self.address)
    }
}

/// Inclusive 24h price-change band, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpportunityWindow {
    pub min_change: f64,
    pub max_change: f64,
}

impl OpportunityWindow {
    pub fn new(min_change: f64, max_change: f64) -> Self {
        Self { min_change, max_change }
    }

    pub fn contains(&self, change: f64) -> bool {
        change >= self.min_change && change <= self.max_change
    }
}

impl Default for OpportunityWindow {
    fn default() -> Self {
        Self::new(9.0, 13.0)
    }
}

/// Current time as fractional Unix seconds.
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub endpoints: Vec<Endpoint>,
    pub chain_tag: String,
    pub window: OpportunityWindow,
    pub request_timeout: Duration,
    pub scan_interval: Duration,
    pub error_backoff: Duration,
    pub max_tokens: usize,
    pub subscriber_buffer: usize,
    pub listen_addr: SocketAddr,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.to_vec(),
            chain_tag: "multi-source".to_string(),
            window: OpportunityWindow::default(),
            request_timeout: Duration::from_secs(5),
            scan_interval: Duration::from_secs(2),
            error_backoff: Duration::from_secs(5),
            max_tokens: 5000,
            subscriber_buffer: 256,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8765)),
        }
    }
}

impl ScannerConfig {
    /// Defaults overlaid with process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each known key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ip) = parse_var::<IpAddr, _>(&lookup, "SCANNER_BIND")? {
            config.listen_addr.set_ip(ip);
        }
        if let Some(port) = parse_var::<u16, _>(&lookup, "SCANNER_PORT")? {
            config.listen_addr.set_port(port);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SCAN_INTERVAL_MS")? {
            config.scan_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SCAN_BACKOFF_MS")? {
            config.error_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "FETCH_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(max) = parse_var::<usize, _>(&lookup, "SCANNER_MAX_TOKENS")? {
            config.max_tokens = max;
        }
        if let Some(buffer) = parse_var::<usize, _>(&lookup, "SUBSCRIBER_BUFFER")? {
            config.subscriber_buffer = buffer;
        }
        if let Some(tag) = lookup("SCANNER_CHAIN_TAG") {
            config.chain_tag = tag.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("request timeout must be non-zero".into()));
        }
        if self.scan_interval.is_zero() {
            return Err(ConfigError::Invalid("scan interval must be non-zero".into()));
        }
        if self.error_backoff.is_zero() {
            return Err(ConfigError::Invalid("error backoff must be non-zero".into()));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid("snapshot capacity must be non-zero".into()));
        }
        if self.subscriber_buffer == 0 {
            return Err(ConfigError::Invalid("subscriber buffer must be non-zero".into()));
        }
        if self.chain_tag.is_empty() {
            return Err(ConfigError::Invalid("chain tag must not be empty".into()));
        }
        if !(self.window.min_change <= self.window.max_change) {
            return Err(ConfigError::Invalid(format!(
                "opportunity window is inverted: {}..={}",
                self.window.min_change, self.window.max_change
            )));
        }
        for endpoint in &self.endpoints {
            endpoint.parsed_url().map_err(|e| {
                ConfigError::Invalid(format!("endpoint {} has a bad url: {}", endpoint.label(), e))
            })?;
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}
