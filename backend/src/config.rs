//! Configuration management for stockflow
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with STOCKFLOW_ prefix

use chrono::{FixedOffset, Offset, Utc};
use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Engine behaviour
    pub engine: EngineConfig,

    /// Post-commit event delivery
    pub events: EventsConfig,

    /// Log output
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Offset of the business day used in order codes
    pub order_code_utc_offset_hours: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    /// Buffered events per subscriber before lagging
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`
    pub filter: String,

    /// `pretty` or `json`
    pub format: String,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("STOCKFLOW_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("database.url", "postgres://localhost/stockflow")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("engine.order_code_utc_offset_hours", 0)?
            .set_default("events.channel_capacity", 256)?
            .set_default(
                "logging.filter",
                "stockflow=debug,stockflow_backend=debug,sqlx=warn",
            )?
            .set_default("logging.format", "pretty")?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (STOCKFLOW_ prefix)
            .add_source(
                Environment::with_prefix("STOCKFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl EngineConfig {
    /// Offset applied when deriving the `YYMMDD` part of an order code
    pub fn order_code_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.order_code_utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order_code_utc_offset_hours: 0,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}
