//! Server configuration from environment variables.
//!
//!   PARTNER_HUB_BIND_ADDR       - listen address (default: 0.0.0.0:4200)
//!   PARTNER_HUB_DATABASE_URL    - Postgres connection string (optional; in-memory store if unset)
//!   PARTNER_HUB_DB_POOL_SIZE    - max pool connections (default: 10)
//!   PARTNER_HUB_JWT_SECRET      - JWT HMAC secret (required)
//!   PARTNER_HUB_EXCHANGE_RATES  - path to a YAML `currency: rate` table (optional)

use std::path::PathBuf;

use partner_hub_core::payout::ExchangeRateTable;
use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:4200";
pub const DEFAULT_POOL_SIZE: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub jwt_secret: String,
    pub exchange_rates_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret =
            get("PARTNER_HUB_JWT_SECRET").ok_or(ConfigError::Missing("PARTNER_HUB_JWT_SECRET"))?;

        let db_pool_size = match get("PARTNER_HUB_DB_POOL_SIZE") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::Invalid {
                    name: "PARTNER_HUB_DB_POOL_SIZE",
                    reason: format!("expected a positive integer, got {raw:?}"),
                })?,
            None => DEFAULT_POOL_SIZE,
        };

        Ok(Self {
            bind_addr: get("PARTNER_HUB_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            database_url: get("PARTNER_HUB_DATABASE_URL"),
            db_pool_size,
            jwt_secret,
            exchange_rates_path: get("PARTNER_HUB_EXCHANGE_RATES").map(PathBuf::from),
        })
    }

    /// The configured currency table, or the built-in one.
    pub fn exchange_rates(&self) -> Result<ExchangeRateTable, ConfigError> {
        match &self.exchange_rates_path {
            Some(path) => {
                ExchangeRateTable::from_path(path).map_err(|e| ConfigError::Invalid {
                    name: "PARTNER_HUB_EXCHANGE_RATES",
                    reason: format!("{e:#}"),
                })
            }
            None => Ok(ExchangeRateTable::default()),
        }
    }
}
