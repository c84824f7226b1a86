//! Per-request settings resolved against the batch configuration

use std::time::Duration;

use super::types::Request;
use crate::cache::CacheFlags;
use crate::config::{EngineConfig, RequestDefaults};

/// A request's own value wins over the batch default when set.
pub fn effective<T>(batch_default: T, request_override: Option<T>) -> T {
    request_override.unwrap_or(batch_default)
}

/// Immutable settings snapshot handed to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestSettings {
    pub cache: CacheFlags,
    pub accept_compressed: bool,
    pub cache_ttl: Duration,
    pub staleness_threshold: Duration,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl RequestSettings {
    pub fn resolve(engine: &EngineConfig, defaults: &RequestDefaults, request: &Request) -> Self {
        let cache = if engine.global_overrides {
            CacheFlags {
                no_cache: engine.no_cache,
                force_recache: engine.force_recache,
            }
        } else {
            CacheFlags {
                no_cache: effective(engine.no_cache, request.no_cache),
                force_recache: effective(engine.force_recache, request.force_recache),
            }
        };

        Self {
            cache: CacheFlags {
                // Responses to requests carrying a body are never cached
                no_cache: cache.no_cache || request.body.is_some(),
                ..cache
            },
            accept_compressed: effective(engine.accept_compressed, request.accept_compressed),
            cache_ttl: effective(defaults.cache_ttl, request.cache_ttl),
            staleness_threshold: effective(
                defaults.cache_staleness_threshold,
                request.cache_staleness_threshold,
            ),
            timeout: effective(defaults.timeout, request.timeout),
            max_retries: effective(defaults.max_retries, request.max_retries),
        }
    }

    /// Attempts allowed before the request is given up
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}
