//! Environment-based configuration
//!
//! # Environment Variables
//!
//! - `ASSETMAN_LOG_LEVEL` - trace, debug, info, warn or error (default: info)
//! - `ASSETMAN_LOG_FORMAT` - "pretty" or "json" (default: pretty)
//! - `ASSETMAN_ROUND_TIMEOUT_SECS` - bounded wait per signing round (default: 30)
//! - `ASSETMAN_SESSION_TTL_SECS` - lifetime of unused participant nonces (default: 300)
//! - `ASSETMAN_EVENT_CAPACITY` - ledger event broadcast buffer (default: 256)
//! - `ASSETMAN_KEY_DIR` - directory for key packages used by the CLI (default: keys)

use crate::logging::LogLevel;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue(
                "ASSETMAN_LOG_FORMAT".to_string(),
                format!("unknown log format: {}", s),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssetmanConfig {
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    /// Bounded wait for each signing round
    pub round_timeout: Duration,
    /// How long a participant keeps unused nonces
    pub session_ttl: Duration,
    /// Capacity of the ledger event broadcast channel
    pub event_capacity: usize,
    pub key_dir: PathBuf,
}

impl Default for AssetmanConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_format: LogFormat::Pretty,
            round_timeout: Duration::from_secs(30),
            session_ttl: Duration::from_secs(300),
            event_capacity: 256,
            key_dir: PathBuf::from("keys"),
        }
    }
}

impl AssetmanConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let log_level = match lookup("ASSETMAN_LOG_LEVEL") {
            Some(v) => v
                .parse()
                .map_err(|e| ConfigError::InvalidValue("ASSETMAN_LOG_LEVEL".to_string(), e))?,
            None => defaults.log_level,
        };

        let log_format = match lookup("ASSETMAN_LOG_FORMAT") {
            Some(v) => v.parse()?,
            None => defaults.log_format,
        };

        let round_timeout = parse_secs(&lookup, "ASSETMAN_ROUND_TIMEOUT_SECS")?
            .unwrap_or(defaults.round_timeout);
        let session_ttl =
            parse_secs(&lookup, "ASSETMAN_SESSION_TTL_SECS")?.unwrap_or(defaults.session_ttl);

        let event_capacity = match lookup("ASSETMAN_EVENT_CAPACITY") {
            Some(v) => match v.parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::InvalidValue(
                        "ASSETMAN_EVENT_CAPACITY".to_string(),
                        "must be greater than zero".to_string(),
                    ))
                }
                Ok(n) => n,
                Err(e) => {
                    return Err(ConfigError::InvalidValue(
                        "ASSETMAN_EVENT_CAPACITY".to_string(),
                        e.to_string(),
                    ))
                }
            },
            None => defaults.event_capacity,
        };

        let key_dir = lookup("ASSETMAN_KEY_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.key_dir);

        Ok(Self {
            log_level,
            log_format,
            round_timeout,
            session_ttl,
            event_capacity,
            key_dir,
        })
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("=== assetman configuration ===");
        println!("Log: {} ({:?})", self.log_level.as_str(), self.log_format);
        println!("Round timeout: {}s", self.round_timeout.as_secs());
        println!("Session TTL: {}s", self.session_ttl.as_secs());
        println!("Event capacity: {}", self.event_capacity);
        println!("Key directory: {}", self.key_dir.display());
        println!("==============================");
    }
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    var_name: &str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = lookup(var_name) else {
        return Ok(None);
    };
    let secs: u64 = value
        .parse()
        .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue(var_name.to_string(), e.to_string()))?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            var_name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Some(Duration::from_secs(secs)))
}
