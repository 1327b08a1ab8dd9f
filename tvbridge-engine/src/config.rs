//! Engine configuration.
//!
//! Each setting is taken from the `[engine]` section of the TOML config
//! file, then from `TVBRIDGE_*` environment variables, then from defaults.
//!
//! ```toml
//! [engine]
//! address = "127.0.0.1:40772"
//! probe_interval_ms = 1000
//! probe_cycles = 100000
//! connect_timeout_ms = 1000
//! request_timeout_ms = 5000
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;
use thiserror::Error;

use crate::gate::ProbePolicy;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:40772";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings for reaching the middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Middleware address (`host:port`).
    pub address: String,
    pub probe: ProbePolicy,
    /// Upper bound for one TCP connect + handshake.
    pub connect_timeout: Duration,
    /// Read timeout for one request/response exchange.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            probe: ProbePolicy::default(),
            connect_timeout: Duration::from_millis(1000),
            request_timeout: Duration::from_millis(5000),
        }
    }
}

/// `[engine]` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub address: Option<String>,
    pub probe_interval_ms: Option<u64>,
    pub probe_cycles: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineSection,
}

impl EngineConfig {
    /// Load from an optional config file plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let section = match path {
            Some(path) => {
                info!("Loading engine configuration from {:?}", path);
                Self::parse_section(&fs::read_to_string(path)?)?
            }
            None => EngineSection::default(),
        };
        Self::resolve(&section, |key| std::env::var(key).ok())
    }

    /// Extract the `[engine]` section; other sections are ignored.
    pub fn parse_section(contents: &str) -> Result<EngineSection, ConfigError> {
        let file: ConfigFile = toml::from_str(contents)?;
        Ok(file.engine)
    }

    /// Combine a file section with environment lookups over the defaults.
    pub fn resolve(
        section: &EngineSection,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let env_u64 = |key: &str| env(key).and_then(|s| s.trim().parse::<u64>().ok());

        let address = section
            .address
            .clone()
            .or_else(|| env("TVBRIDGE_ADDRESS"))
            .unwrap_or(defaults.address);

        let interval = section
            .probe_interval_ms
            .or_else(|| env_u64("TVBRIDGE_PROBE_INTERVAL_MS"))
            .map(Duration::from_millis)
            .unwrap_or(defaults.probe.interval);

        let cycles = section
            .probe_cycles
            .or_else(|| env_u64("TVBRIDGE_PROBE_CYCLES").and_then(|v| u32::try_from(v).ok()))
            .unwrap_or(defaults.probe.cycles);

        let connect_timeout = section
            .connect_timeout_ms
            .or_else(|| env_u64("TVBRIDGE_CONNECT_TIMEOUT_MS"))
            .map(Duration::from_millis)
            .unwrap_or(defaults.connect_timeout);

        let request_timeout = section
            .request_timeout_ms
            .or_else(|| env_u64("TVBRIDGE_REQUEST_TIMEOUT_MS"))
            .map(Duration::from_millis)
            .unwrap_or(defaults.request_timeout);

        if interval.is_zero() {
            return Err(ConfigError::Invalid("probe interval must be positive".into()));
        }
        if cycles == 0 {
            return Err(ConfigError::Invalid("probe cycles must be positive".into()));
        }
        if request_timeout.is_zero() {
            return Err(ConfigError::Invalid("request timeout must be positive".into()));
        }

        let config = Self {
            address,
            probe: ProbePolicy { interval, cycles },
            connect_timeout,
            request_timeout,
        };
        debug!("Engine configuration: {:?}", config);
        Ok(config)
    }
}
