//! Response and address caching
//!
//! The executor talks to a [`CacheStore`] keyed by logical keys (a request's
//! source URI, `dns_<host>` for addresses). Stores hash those keys together
//! with a version tag, stamp each entry with its freshness window and drop
//! it once it has also outlived `stale_retention`.
//!
//! Two stores ship with the crate:
//!
//! - [`FjallCacheStore`] persists entries in an embedded fjall keyspace
//! - [`MemoryCacheStore`] keeps them in a process-local map
//!
//! Freshness itself is decided by [`FreshnessPolicy`], which never touches
//! the store.

mod entry;
mod error;
mod freshness;
pub mod keys;
mod memory;
mod store;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheBackend, CacheConfig};

pub use entry::{CacheEntry, CachedResponse, HeadersMap};
pub(crate) use entry::AddressRecord;
pub use error::{CacheError, Result};
pub use freshness::{CacheDecision, CacheFlags, FreshnessPolicy};
pub use memory::MemoryCacheStore;
pub use store::{CacheStats, FjallCacheStore};

use entry::{StoredRecord, duration_ms};

/// Key/value store with freshness metadata
///
/// Implementations must tolerate concurrent reads and writes from many
/// workers; the last writer wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Entry for `key`, or `None` if absent or past storage expiry.
    async fn read(&self, key: &str) -> Result<Option<CacheEntry<Bytes>>>;

    /// Replace the entry for `key` and return the storage key it landed under.
    async fn write(
        &self,
        key: &str,
        payload: Bytes,
        ttl: Duration,
        staleness_threshold: Duration,
    ) -> Result<String>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Write-side limits shared by every store
#[derive(Debug, Clone)]
pub struct CacheLimits {
    pub key_version: String,
    pub max_entry_bytes: usize,
    pub max_staleness_threshold: Duration,
    pub stale_retention: Duration,
}

impl From<&CacheConfig> for CacheLimits {
    fn from(config: &CacheConfig) -> Self {
        Self {
            key_version: config.key_version.clone(),
            max_entry_bytes: config.max_entry_bytes.as_usize(),
            max_staleness_threshold: config.max_staleness_threshold,
            stale_retention: config.stale_retention,
        }
    }
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl CacheLimits {
    pub fn storage_key(&self, key: &str) -> String {
        keys::versioned_key(&self.key_version, key)
    }

    pub(crate) fn prepare(
        &self,
        payload: Bytes,
        ttl: Duration,
        staleness_threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<StoredRecord> {
        if payload.len() > self.max_entry_bytes {
            return Err(CacheError::EntryTooLarge {
                size: payload.len(),
                limit: self.max_entry_bytes,
            });
        }

        let staleness_threshold = staleness_threshold.min(self.max_staleness_threshold);
        let lifetime = ttl
            .saturating_add(staleness_threshold)
            .saturating_add(self.stale_retention);
        let stored_at_ms = now.timestamp_millis();
        let expires_at_ms =
            stored_at_ms.saturating_add(i64::try_from(duration_ms(lifetime)).unwrap_or(i64::MAX));

        Ok(StoredRecord {
            payload,
            ttl_ms: duration_ms(ttl),
            staleness_threshold_ms: duration_ms(staleness_threshold),
            stored_at_ms,
            expires_at_ms,
        })
    }
}

/// Open the store selected by configuration
pub fn open_store(config: &CacheConfig) -> Result<Arc<dyn CacheStore>> {
    let limits = CacheLimits::from(config);
    let store: Arc<dyn CacheStore> = match config.backend {
        CacheBackend::Fjall => Arc::new(FjallCacheStore::open(&config.path, limits)?),
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new(limits)),
    };
    Ok(store)
}
