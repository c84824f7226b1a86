use crate::humanize::{ByteSize, duration};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub request_defaults: RequestDefaults,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Batch-level switches applied to every request of a run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub no_cache: bool,
    #[serde(default)]
    pub force_recache: bool,
    #[serde(default = "default_true")]
    pub accept_compressed: bool,
    /// When set, batch cache flags win over per-request flags
    #[serde(default)]
    pub global_overrides: bool,
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            no_cache: false,
            force_recache: false,
            accept_compressed: true,
            global_overrides: false,
            parallel: true,
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    32
}

/// Which cache store implementation backs a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Fjall,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Bumping the version invalidates every previously written entry
    #[serde(default = "default_key_version")]
    pub key_version: String,
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: ByteSize,
    /// Staleness thresholds above this are clamped on write
    #[serde(default = "default_max_staleness_threshold", with = "duration")]
    pub max_staleness_threshold: Duration,
    /// How long an entry is kept past its freshness window as a failure fallback
    #[serde(default = "default_stale_retention", with = "duration")]
    pub stale_retention: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            path: default_cache_path(),
            key_version: default_key_version(),
            max_entry_bytes: default_max_entry_bytes(),
            max_staleness_threshold: default_max_staleness_threshold(),
            stale_retention: default_stale_retention(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_key_version() -> String {
    "1".to_string()
}

fn default_max_entry_bytes() -> ByteSize {
    ByteSize(2 * 1024 * 1024) // 2 MB
}

fn default_max_staleness_threshold() -> Duration {
    Duration::from_secs(86400)
}

fn default_stale_retention() -> Duration {
    Duration::from_secs(86400)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_connect_timeout", with = "duration")]
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_user_agent() -> String {
    format!("fetchbatch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_redirects() -> usize {
    2
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DnsConfig {
    #[serde(default = "default_dns_ttl", with = "duration")]
    pub ttl: Duration,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            ttl: default_dns_ttl(),
        }
    }
}

fn default_dns_ttl() -> Duration {
    Duration::from_secs(3600)
}

/// Values used for request options the caller leaves unset
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestDefaults {
    #[serde(default = "default_cache_ttl", with = "duration")]
    pub cache_ttl: Duration,
    #[serde(default = "default_staleness_threshold", with = "duration")]
    pub cache_staleness_threshold: Duration,
    #[serde(default = "default_timeout", with = "duration")]
    pub timeout: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            cache_ttl: default_cache_ttl(),
            cache_staleness_threshold: default_staleness_threshold(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_staleness_threshold() -> Duration {
    Duration::from_secs(86400)
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_retries() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}
