use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use prost::Message;
use tracing::{debug, info};

use super::entry::{CacheEntry, StoredRecord};
use super::error::Result;
use super::{CacheLimits, CacheStore};

/// Fjall-backed persistent cache
///
/// Partition layout:
/// - `entries`: sha256(version_key) -> StoredRecord (protobuf)
#[derive(Clone)]
pub struct FjallCacheStore {
    keyspace: Keyspace,
    entries: PartitionHandle,
    limits: CacheLimits,
    reads: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
}

impl FjallCacheStore {
    /// Open or create a cache keyspace at the given path
    pub fn open<P: AsRef<Path>>(path: P, limits: CacheLimits) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening fjall cache at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let entries = keyspace.open_partition("entries", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            entries,
            limits,
            reads: Arc::new(AtomicU64::new(0)),
            writes: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Remove every record past its storage expiry, returning how many went
    pub fn prune_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut pruned = 0;

        for item in self.entries.iter() {
            let (key, value) = item?;
            let expired = match StoredRecord::decode(&*value) {
                Ok(record) => record.is_expired(now),
                // Undecodable records cannot be served; drop them too
                Err(_) => true,
            };
            if expired {
                self.entries.remove(key)?;
                pruned += 1;
            }
        }

        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        info!(pruned, "Pruned expired cache entries");
        Ok(pruned)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut entry_count = 0;
        for item in self.entries.iter() {
            item?;
            entry_count += 1;
        }

        Ok(CacheStats {
            entry_count,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        })
    }
}

#[async_trait]
impl CacheStore for FjallCacheStore {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry<Bytes>>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let storage_key = self.limits.storage_key(key);

        let Some(value) = self.entries.get(storage_key.as_str())? else {
            return Ok(None);
        };
        let record = StoredRecord::decode(&*value)?;
        if record.is_expired(Utc::now()) {
            self.entries.remove(storage_key.as_str())?;
            debug!(key, "Dropped expired cache entry");
            return Ok(None);
        }
        record.into_entry().map(Some)
    }

    async fn write(
        &self,
        key: &str,
        payload: Bytes,
        ttl: Duration,
        staleness_threshold: Duration,
    ) -> Result<String> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let record = self
            .limits
            .prepare(payload, ttl, staleness_threshold, Utc::now())?;
        let storage_key = self.limits.storage_key(key);

        self.entries.insert(storage_key.as_str(), record.encode_to_vec())?;
        debug!(key, storage_key, "Cache entry written");
        Ok(storage_key)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(self.limits.storage_key(key))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entry_count: usize,
    pub reads: u64,
    pub writes: u64,
}
