//! Configuration: built-in defaults, an optional `telemetry-gateway` file,
//! then `GCS_`-prefixed environment variables

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::source::DEFAULT_PRODUCER_TIMEOUT;

const FILE_NAME: &str = "telemetry-gateway";
const ENV_PREFIX: &str = "GCS";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP/SSE/WebSocket bind address
    pub http_bind: String,

    pub http_port: u16,

    /// `host:port` of a bridge emitting JSON MAVLink records, one per line.
    /// The live link is disabled when unset.
    #[serde(default)]
    pub live_link_addr: Option<String>,

    /// Simulator endpoint; empty disables it
    pub simulator_url: String,

    /// Synthetic orbit when no real producer answers
    pub fallback_enabled: bool,

    /// Ingestion and broadcast cadence
    pub tick_interval_ms: u64,

    /// Bound on a single producer call
    pub producer_timeout_ms: u64,

    /// Expected heartbeat period
    pub heartbeat_interval_ms: u64,

    pub history_capacity: usize,

    /// Orbit centre for the synthetic generator
    pub fallback_home_lat: f64,
    pub fallback_home_lon: f64,
}

impl Config {
    /// Load from the file in the working directory and the environment
    pub fn load() -> Result<Self> {
        Self::load_with_prefix(ENV_PREFIX)
    }

    fn load_with_prefix(prefix: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("http_bind", "0.0.0.0")?
            .set_default("http_port", 8888)?
            .set_default("simulator_url", "http://127.0.0.1:5000/")?
            .set_default("fallback_enabled", true)?
            .set_default("tick_interval_ms", 100)?
            .set_default("producer_timeout_ms", DEFAULT_PRODUCER_TIMEOUT.as_millis() as i64)?
            .set_default("heartbeat_interval_ms", 1000)?
            .set_default("history_capacity", DEFAULT_HISTORY_CAPACITY as i64)?
            .set_default("fallback_home_lat", 34.0522)?
            .set_default("fallback_home_lon", -118.2437)?
            .add_source(config::File::with_name(FILE_NAME).required(false))
            .add_source(config::Environment::with_prefix(prefix).try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        let config: Self = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be greater than zero");
        }
        if self.producer_timeout_ms == 0 {
            bail!("producer_timeout_ms must be greater than zero");
        }
        if self.heartbeat_interval_ms == 0 {
            bail!("heartbeat_interval_ms must be greater than zero");
        }
        if self.history_capacity == 0 {
            bail!("history_capacity must be greater than zero");
        }
        if !(-90.0..=90.0).contains(&self.fallback_home_lat)
            || !(-180.0..=180.0).contains(&self.fallback_home_lon)
        {
            bail!(
                "fallback home ({}, {}) is not a valid coordinate",
                self.fallback_home_lat,
                self.fallback_home_lon
            );
        }
        if self.live_link_addr.is_none() && self.simulator_url().is_none() && !self.fallback_enabled {
            bail!("no telemetry producer enabled");
        }
        Ok(())
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_bind, self.http_port)
    }

    /// Live link address, `None` when unset or blank
    pub fn live_link_addr(&self) -> Option<&str> {
        self.live_link_addr
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
    }

    pub fn simulator_url(&self) -> Option<&str> {
        Some(self.simulator_url.trim()).filter(|url| !url.is_empty())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn producer_timeout(&self) -> Duration {
        Duration::from_millis(self.producer_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::load_with_prefix("GCSTESTDEFAULTS").unwrap();
        assert_eq!(config.http_addr(), "0.0.0.0:8888");
        assert_eq!(config.live_link_addr(), None);
        assert_eq!(config.simulator_url(), Some("http://127.0.0.1:5000/"));
        assert!(config.fallback_enabled);
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.producer_timeout(), DEFAULT_PRODUCER_TIMEOUT);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(config.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert_eq!(config.fallback_home_lat, 34.0522);
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("GCSTESTENV_HTTP_PORT", "9000");
        std::env::set_var("GCSTESTENV_LIVE_LINK_ADDR", "10.0.0.2:5760");
        std::env::set_var("GCSTESTENV_FALLBACK_ENABLED", "false");

        let config = Config::load_with_prefix("GCSTESTENV").unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.live_link_addr(), Some("10.0.0.2:5760"));
        assert!(!config.fallback_enabled);
    }

    #[test]
    fn test_zero_interval_rejected() {
        std::env::set_var("GCSTESTZERO_TICK_INTERVAL_MS", "0");
        let err = Config::load_with_prefix("GCSTESTZERO").unwrap_err();
        assert!(format!("{:#}", err).contains("tick_interval_ms"));
    }

    #[test]
    fn test_requires_a_producer() {
        let mut config = Config::load_with_prefix("GCSTESTPRODUCERS").unwrap();
        config.simulator_url = String::new();
        config.fallback_enabled = false;
        assert!(config.validate().is_err());

        config.live_link_addr = Some("127.0.0.1:5760".into());
        assert!(config.validate().is_ok());
    }
}
