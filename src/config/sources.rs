use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "FETCHBATCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/fetchbatch.toml";
const ENV_PREFIX: &str = "FETCHBATCH";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_sources(config_path)
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // FETCHBATCH__ENGINE__NO_CACHE -> engine.no_cache
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.http.max_redirects, 2);
        assert_eq!(config.cache.key_version, "1");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[engine]
parallel = false
max_concurrency = 4
global_overrides = true

[cache]
path = "/tmp/fetchbatch-cache"
key_version = "7"
stale_retention = "12h"

[http]
user_agent = "test-agent/1.0"
max_redirects = 5
connect_timeout = "3s"

[dns]
ttl = "30m"

[request_defaults]
cache_ttl = "5m"
timeout = 2
max_retries = 3

[telemetry]
log_filter = "fetchbatch=debug"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert!(!config.engine.parallel);
        assert!(config.engine.global_overrides);
        assert_eq!(config.engine.max_concurrency, 4);
        assert_eq!(config.cache.key_version, "7");
        assert_eq!(config.cache.stale_retention, Duration::from_secs(12 * 3600));
        assert_eq!(config.http.user_agent, "test-agent/1.0");
        assert_eq!(config.http.max_redirects, 5);
        assert_eq!(config.http.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.dns.ttl, Duration::from_secs(1800));
        assert_eq!(config.request_defaults.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.request_defaults.timeout, Duration::from_secs(2));
        assert_eq!(config.request_defaults.max_retries, 3);
        assert_eq!(config.telemetry.log_filter, "fetchbatch=debug");
    }
}
