//! Server configuration and environment variable handling.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use schedule_engine::{SchedulingConfig, SchedulingError};
use thiserror::Error;

use crate::telemetry::TracingOutputFormat;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SCHEDULE_BIND_ADDR must be a socket address like 0.0.0.0:8080, got '{0}'")]
    BindAddr(String),

    #[error("SCHEDULE_LOG_FORMAT: {0}")]
    LogFormat(String),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub log_format: TracingOutputFormat,
    /// Participants and sessions loaded into the in-memory stores at startup.
    pub seed_file: Option<PathBuf>,
    pub scheduling: SchedulingConfig,
}

impl ServerConfig {
    /// Load the server configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `SCHEDULE_BIND_ADDR` (optional, default: `0.0.0.0:8080`)
    /// - `SCHEDULE_LOG_FORMAT` (optional, default: `pretty`): `pretty` | `compact` | `json`
    /// - `SCHEDULE_SEED_FILE` (optional): JSON file with `therapists`, `clients`
    ///   and `sessions` to preload
    /// - every variable read by [`SchedulingConfig::from_env`]
    ///
    /// # Errors
    /// Returns an error when a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_addr = lookup("SCHEDULE_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = raw_addr
            .trim()
            .parse()
            .map_err(|_| ConfigError::BindAddr(raw_addr.clone()))?;

        let log_format = match lookup("SCHEDULE_LOG_FORMAT") {
            Some(raw) => raw.parse().map_err(ConfigError::LogFormat)?,
            None => TracingOutputFormat::default(),
        };

        let seed_file = lookup("SCHEDULE_SEED_FILE")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            bind_addr,
            log_format,
            seed_file,
            scheduling: SchedulingConfig::from_lookup(&lookup)?,
        })
    }
}
