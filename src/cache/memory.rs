use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::entry::{CacheEntry, StoredRecord};
use super::error::Result;
use super::store::CacheStats;
use super::{CacheLimits, CacheStore};

/// Process-local cache store
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    limits: CacheLimits,
    entries: RwLock<HashMap<String, StoredRecord>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryCacheStore {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.read().await.len(),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry<Bytes>>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let storage_key = self.limits.storage_key(key);

        let record = self.entries.read().await.get(&storage_key).cloned();
        match record {
            Some(record) if record.is_expired(Utc::now()) => {
                self.entries.write().await.remove(&storage_key);
                Ok(None)
            }
            Some(record) => record.into_entry().map(Some),
            None => Ok(None),
        }
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

        self.entries
            .write()
            .await
            .insert(storage_key.clone(), record);
        tracing::debug!(key, storage_key, "Cache entry written");
        Ok(storage_key)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let storage_key = self.limits.storage_key(key);
        self.entries.write().await.remove(&storage_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_write_then_read() {
        let store = MemoryCacheStore::default();
        store
            .write(
                "http://example.com/",
                Bytes::from_static(b"hello"),
                Duration::from_secs(60),
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        let entry = store.read("http://example.com/").await.unwrap().unwrap();
        assert_eq!(entry.payload, Bytes::from_static(b"hello"));
        assert_eq!(entry.ttl, Duration::from_secs(60));
        assert_eq!(entry.staleness_threshold, Duration::from_secs(30));

        let stats = store.stats().await;
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_stale_entry_survives_retention_window() {
        let store = MemoryCacheStore::default();
        store
            .write("k", Bytes::from_static(b"v"), Duration::ZERO, Duration::ZERO)
            .await
            .unwrap();

        let entry = store.read("k").await.unwrap().unwrap();
        assert!(!entry.is_fresh(Utc::now()));
    }

    #[tokio::test]
    async fn test_expired_entry_disappears() {
        let store = MemoryCacheStore::new(CacheLimits {
            stale_retention: Duration::ZERO,
            ..CacheLimits::default()
        });
        store
            .write("k", Bytes::from_static(b"v"), Duration::ZERO, Duration::ZERO)
            .await
            .unwrap();

        assert!(store.read("k").await.unwrap().is_none());
        assert_eq!(store.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn test_version_bump_hides_old_entries() {
        let store = MemoryCacheStore::default();
        store
            .write("k", Bytes::from_static(b"v1"), Duration::from_secs(60), Duration::ZERO)
            .await
            .unwrap();

        let bumped = MemoryCacheStore {
            limits: CacheLimits {
                key_version: "2".to_string(),
                ..CacheLimits::default()
            },
            entries: RwLock::new(store.entries.read().await.clone()),
            ..MemoryCacheStore::default()
        };
        assert!(bumped.read("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryCacheStore::default();
        store
            .write("k", Bytes::from_static(b"v"), Duration::from_secs(60), Duration::ZERO)
            .await
            .unwrap();
        store.delete("k").await.unwrap();
        assert!(store.read("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writers_same_key() {
        let store = Arc::new(MemoryCacheStore::default());
        let mut handles = Vec::new();
        for i in 0..16u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .write("shared", Bytes::from(vec![i; 8]), Duration::from_secs(60), Duration::ZERO)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let entry = store.read("shared").await.unwrap().unwrap();
        assert_eq!(entry.payload.len(), 8);
        assert!(entry.payload.iter().all(|b| *b == entry.payload[0]));
    }
}
