//! Configuration management for fetchbatch
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use fetchbatch::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Redirect limit: {}", config.http.max_redirects);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `FETCHBATCH__<section>__<key>`
//!
//! Examples:
//! - `FETCHBATCH__ENGINE__NO_CACHE=true`
//! - `FETCHBATCH__CACHE__KEY_VERSION=2`
//! - `FETCHBATCH__REQUEST_DEFAULTS__TIMEOUT=10s`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/fetchbatch.toml`.
//! This can be overridden using the `FETCHBATCH_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    CacheBackend, CacheConfig, Config, DnsConfig, EngineConfig, HttpConfig, RequestDefaults,
    TelemetryConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a value
    /// fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
