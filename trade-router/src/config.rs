//! Runtime configuration from environment variables

use std::net::SocketAddr;
use swapbook_matching_engine::EngineConfig;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// SQLite file, or ":memory:"
    pub db_path: String,
    pub log_filter: String,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = EngineConfig::default();

        Ok(Self {
            bind_addr: parse(&lookup, "SWAPBOOK_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 5002)))?,
            db_path: lookup("SWAPBOOK_DB_PATH").unwrap_or_else(|| "data/orders.db".to_string()),
            log_filter: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            engine: EngineConfig {
                max_conflict_retries: parse(
                    &lookup,
                    "SWAPBOOK_MAX_CONFLICT_RETRIES",
                    defaults.max_conflict_retries,
                )?,
                max_fills_per_order: parse(
                    &lookup,
                    "SWAPBOOK_MAX_FILLS_PER_ORDER",
                    defaults.max_fills_per_order,
                )?,
            },
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
