//! Typed cache entries and their stored encoding
//!
//! Records are prost messages so the fjall partition and the in-memory store
//! hold the same bytes.

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use prost::Message;
use std::collections::BTreeMap;
use std::time::Duration;

use super::error::{CacheError, Result};

pub type HeadersMap = BTreeMap<String, String>;

/// One cached value plus the freshness window it was written with
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub ttl: Duration,
    pub staleness_threshold: Duration,
    pub stored_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// End of the freshness window; `None` when it lies beyond chrono's range.
    pub fn fresh_until(&self) -> Option<DateTime<Utc>> {
        let window = TimeDelta::from_std(self.ttl.saturating_add(self.staleness_threshold)).ok()?;
        self.stored_at.checked_add_signed(window)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.fresh_until() {
            Some(until) => now < until,
            None => true,
        }
    }

    pub fn try_map<U>(self, f: impl FnOnce(T) -> Result<U>) -> Result<CacheEntry<U>> {
        Ok(CacheEntry {
            payload: f(self.payload)?,
            ttl: self.ttl,
            staleness_threshold: self.staleness_threshold,
            stored_at: self.stored_at,
        })
    }
}

/// A network response as it is kept in the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub body: Bytes,
    pub status: u16,
    pub headers: HeadersMap,
    pub elapsed: Duration,
    pub final_url: Option<String>,
}

impl CachedResponse {
    pub fn encode(&self) -> Bytes {
        let record = ResponseRecord {
            body: self.body.clone(),
            status: u32::from(self.status),
            headers: self.headers.clone(),
            elapsed_micros: u64::try_from(self.elapsed.as_micros()).unwrap_or(u64::MAX),
            final_url: self.final_url.clone(),
        };
        Bytes::from(record.encode_to_vec())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let record = ResponseRecord::decode(bytes)?;
        let status = u16::try_from(record.status)
            .map_err(|_| CacheError::Corrupt(format!("status {} out of range", record.status)))?;
        Ok(Self {
            body: record.body,
            status,
            headers: record.headers,
            elapsed: Duration::from_micros(record.elapsed_micros),
            final_url: record.final_url,
        })
    }
}

/// Envelope written under a versioned key
#[derive(Clone, PartialEq, Message)]
pub(crate) struct StoredRecord {
    #[prost(bytes = "bytes", tag = "1")]
    pub payload: Bytes,
    #[prost(uint64, tag = "2")]
    pub ttl_ms: u64,
    #[prost(uint64, tag = "3")]
    pub staleness_threshold_ms: u64,
    #[prost(int64, tag = "4")]
    pub stored_at_ms: i64,
    /// Past this instant the record no longer exists for readers
    #[prost(int64, tag = "5")]
    pub expires_at_ms: i64,
}

impl StoredRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() >= self.expires_at_ms
    }

    pub fn into_entry(self) -> Result<CacheEntry<Bytes>> {
        let stored_at = DateTime::from_timestamp_millis(self.stored_at_ms)
            .ok_or_else(|| CacheError::Corrupt(format!("timestamp {}", self.stored_at_ms)))?;
        Ok(CacheEntry {
            payload: self.payload,
            ttl: Duration::from_millis(self.ttl_ms),
            staleness_threshold: Duration::from_millis(self.staleness_threshold_ms),
            stored_at,
        })
    }
}

#[derive(Clone, PartialEq, Message)]
struct ResponseRecord {
    #[prost(bytes = "bytes", tag = "1")]
    body: Bytes,
    #[prost(uint32, tag = "2")]
    status: u32,
    #[prost(btree_map = "string, string", tag = "3")]
    headers: BTreeMap<String, String>,
    #[prost(uint64, tag = "4")]
    elapsed_micros: u64,
    #[prost(string, optional, tag = "5")]
    final_url: Option<String>,
}

/// Resolved addresses for one hostname
#[derive(Clone, PartialEq, Message)]
pub(crate) struct AddressRecord {
    #[prost(string, repeated, tag = "1")]
    pub addresses: Vec<String>,
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
