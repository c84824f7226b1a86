//! Cache freshness decisions
//!
//! Pure logic: given what the store returned and the request's effective
//! flags, decide whether the network is needed.

use chrono::{DateTime, Utc};

use super::entry::CacheEntry;

/// Effective cache switches for one request, after override resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheFlags {
    pub no_cache: bool,
    pub force_recache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Neither read nor write the cache
    SkipCache,
    /// Serve the entry, no network call
    Hit,
    /// Fetch from the network; any existing entry stays as a fallback
    Miss,
}

pub struct FreshnessPolicy;

impl FreshnessPolicy {
    pub fn decide<T>(
        entry: Option<&CacheEntry<T>>,
        now: DateTime<Utc>,
        flags: CacheFlags,
    ) -> CacheDecision {
        if flags.no_cache {
            return CacheDecision::SkipCache;
        }
        match entry {
            Some(entry) if entry.is_fresh(now) && !flags.force_recache => CacheDecision::Hit,
            _ => CacheDecision::Miss,
        }
    }
}
