//! Hostname resolution with cached address lists
//!
//! Resolved addresses are stored in the shared [`CacheStore`] under
//! `dns_<host>` for the configured DNS TTL, so every worker of a batch (and
//! later batches against a persistent store) reuse one lookup per host.
//! Requests that bypass the cache resolve through
//! [`NameResolver::resolve_uncached`] and leave the store untouched.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use prost::Message;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::keys::dns_key;
use crate::cache::{AddressRecord, CacheStore};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("lookup of {host} failed: {reason}")]
    Lookup { host: String, reason: String },

    #[error("no addresses for {0}")]
    NoAddresses(String),
}

#[async_trait]
pub trait NameResolver: Send + Sync {
    /// One address for `hostname`; IP literals come back unchanged.
    async fn resolve(&self, hostname: &str) -> Result<IpAddr, ResolveError>;

    /// Like [`resolve`](Self::resolve), without reading or writing any cache.
    async fn resolve_uncached(&self, hostname: &str) -> Result<IpAddr, ResolveError> {
        self.resolve(hostname).await
    }
}

/// System resolver fronted by the response cache
pub struct CachingResolver {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl CachingResolver {
    pub fn new(cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    async fn cached(&self, key: &str) -> Option<Vec<IpAddr>> {
        let entry = match self.cache.read(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(key, error = %e, "DNS cache read failed");
                return None;
            }
        };
        if !entry.is_fresh(Utc::now()) {
            return None;
        }

        let record = AddressRecord::decode(entry.payload.as_ref()).ok()?;
        let addresses: Vec<IpAddr> = record
            .addresses
            .iter()
            .filter_map(|address| address.parse().ok())
            .collect();
        (!addresses.is_empty()).then_some(addresses)
    }

    async fn store(&self, key: &str, addresses: &[IpAddr]) {
        let record = AddressRecord {
            addresses: addresses.iter().map(ToString::to_string).collect(),
        };
        let payload = Bytes::from(record.encode_to_vec());
        if let Err(e) = self.cache.write(key, payload, self.ttl, Duration::ZERO).await {
            warn!(key, error = %e, "DNS cache write failed");
        }
    }
}

#[async_trait]
impl NameResolver for CachingResolver {
    async fn resolve(&self, hostname: &str) -> Result<IpAddr, ResolveError> {
        if let Some(ip) = parse_literal(hostname) {
            return Ok(ip);
        }

        let key = dns_key(hostname);
        if let Some(addresses) = self.cached(&key).await {
            debug!(hostname, count = addresses.len(), "DNS cache hit");
            return pick(hostname, &addresses);
        }

        let addresses = system_lookup(hostname).await?;
        debug!(hostname, count = addresses.len(), "Resolved hostname");
        self.store(&key, &addresses).await;
        pick(hostname, &addresses)
    }

    async fn resolve_uncached(&self, hostname: &str) -> Result<IpAddr, ResolveError> {
        if let Some(ip) = parse_literal(hostname) {
            return Ok(ip);
        }
        let addresses = system_lookup(hostname).await?;
        pick(hostname, &addresses)
    }
}

/// Fixed host table; names it does not know fail to resolve
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, hostname: &str, ip: IpAddr) -> Self {
        self.hosts
            .entry(hostname.to_ascii_lowercase())
            .or_default()
            .push(ip);
        self
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve(&self, hostname: &str) -> Result<IpAddr, ResolveError> {
        if let Some(ip) = parse_literal(hostname) {
            return Ok(ip);
        }
        let addresses = self
            .hosts
            .get(&hostname.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default();
        pick(hostname, addresses)
    }
}

fn parse_literal(hostname: &str) -> Option<IpAddr> {
    hostname
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

async fn system_lookup(hostname: &str) -> Result<Vec<IpAddr>, ResolveError> {
    let resolved = tokio::net::lookup_host((hostname, 0))
        .await
        .map_err(|e| ResolveError::Lookup {
            host: hostname.to_string(),
            reason: e.to_string(),
        })?;

    let mut addresses: Vec<IpAddr> = Vec::new();
    for address in resolved {
        if !addresses.contains(&address.ip()) {
            addresses.push(address.ip());
        }
    }
    if addresses.is_empty() {
        return Err(ResolveError::NoAddresses(hostname.to_string()));
    }
    Ok(addresses)
}

/// Random address, IPv4 preferred
fn pick(hostname: &str, addresses: &[IpAddr]) -> Result<IpAddr, ResolveError> {
    let v4: Vec<IpAddr> = addresses.iter().copied().filter(IpAddr::is_ipv4).collect();
    let candidates: &[IpAddr] = if v4.is_empty() { addresses } else { &v4 };

    candidates
        .choose(&mut rand::thread_rng())
        .copied()
        .ok_or_else(|| ResolveError::NoAddresses(hostname.to_string()))
}
