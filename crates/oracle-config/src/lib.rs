#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! Typed configuration loading.
//!
//! Mirrors `config/config.go`'s two-source precedence (a TOML file,
//! overlaid by environment variables with `.` replaced by `_` and
//! upper-cased) without pulling in a generic config-merging crate, the same
//! way `cli/src/commands/config.rs` reads a plain `serde` struct from TOML
//! rather than routing it through a generic merge layer.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid environment override {key}={value}: {reason}")]
    InvalidEnvOverride {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub price_ticker: PriceTickerConfig,
    pub pubsub: PubSubConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceTickerConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub mock: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    pub topic: String,
    pub port: u16,
    pub fetch_price_interval_secs: u64,
    pub min_signatures_to_write: usize,
    pub min_interval_between_writes_secs: u64,
    /// How often the transport re-queries the local network for peers via
    /// mDNS. Discovery is local-network-only; there is no wide-area DHT pass
    /// for this value to drive.
    pub discover_peers_interval_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Loads configuration from `path` (TOML), then overlays any
    /// `ORACLE_`-prefixed environment variables, e.g. `ORACLE_DATABASE_URL`
    /// overrides `database.url`, `ORACLE_PUBSUB_PORT` overrides `pubsub.port`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut table: toml::Value = toml::from_str(&raw)?;
        apply_env_overrides(&mut table)?;
        let config: Config = table.try_into()?;
        Ok(config)
    }
}

/// The full set of recognized `ORACLE_`-prefixed environment overrides,
/// mapped to their `section.field` path — the same fixed key set `viper`'s
/// `AutomaticEnv` resolves against, since the mapping from
/// `SECTION_FIELD_WITH_UNDERSCORES` back to `section.field_with_underscores`
/// is ambiguous without knowing the schema.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("ORACLE_DATABASE_URL", "database.url"),
    ("ORACLE_PRICE_TICKER_URL", "price_ticker.url"),
    ("ORACLE_PRICE_TICKER_MOCK", "price_ticker.mock"),
    ("ORACLE_PUBSUB_TOPIC", "pubsub.topic"),
    ("ORACLE_PUBSUB_PORT", "pubsub.port"),
    (
        "ORACLE_PUBSUB_FETCH_PRICE_INTERVAL_SECS",
        "pubsub.fetch_price_interval_secs",
    ),
    (
        "ORACLE_PUBSUB_MIN_SIGNATURES_TO_WRITE",
        "pubsub.min_signatures_to_write",
    ),
    (
        "ORACLE_PUBSUB_MIN_INTERVAL_BETWEEN_WRITES_SECS",
        "pubsub.min_interval_between_writes_secs",
    ),
    (
        "ORACLE_PUBSUB_DISCOVER_PEERS_INTERVAL_SECS",
        "pubsub.discover_peers_interval_secs",
    ),
    ("ORACLE_LOG_LEVEL", "log_level"),
];

fn apply_env_overrides(table: &mut toml::Value) -> Result<(), ConfigError> {
    for (env_key, config_path) in ENV_OVERRIDES {
        let Ok(value) = std::env::var(env_key) else {
            continue;
        };
        set_at_path(table, config_path, &value).map_err(|reason| ConfigError::InvalidEnvOverride {
            key: env_key.to_string(),
            value,
            reason,
        })?;
    }
    Ok(())
}

fn set_at_path(table: &mut toml::Value, path: &str, raw_value: &str) -> Result<(), String> {
    match path.split_once('.') {
        Some((section, field)) => {
            let toml::Value::Table(root) = table else {
                return Err("configuration root is not a table".to_string());
            };
            let section_value = root
                .entry(section.to_string())
                .or_insert_with(|| toml::Value::Table(Default::default()));
            set_scalar(section_value, field, raw_value);
            Ok(())
        }
        None => {
            set_scalar(table, path, raw_value);
            Ok(())
        }
    }
}

fn set_scalar(value: &mut toml::Value, field: &str, raw_value: &str) {
    let toml::Value::Table(map) = value else {
        return;
    };
    let parsed = if let Ok(b) = raw_value.parse::<bool>() {
        toml::Value::Boolean(b)
    } else if let Ok(i) = raw_value.parse::<i64>() {
        toml::Value::Integer(i)
    } else {
        toml::Value::String(raw_value.to_string())
    };
    map.insert(field.to_string(), parsed);
}
