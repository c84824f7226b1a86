use async_trait::async_trait;
use bytes::Bytes;
use std::net::IpAddr;
use std::time::Duration;

use super::error::TransportError;
use crate::cache::{CachedResponse, HeadersMap};
use crate::dns::{NameResolver, ResolveError};
use crate::request::{Request, RequestSettings};

/// Everything a backend may consult for one attempt
pub struct FetchContext<'a> {
    pub request: &'a Request,
    pub settings: &'a RequestSettings,
    pub resolver: &'a dyn NameResolver,
}

impl FetchContext<'_> {
    /// Address for `hostname`; `no_cache` requests skip the address cache
    pub async fn resolve(&self, hostname: &str) -> Result<IpAddr, ResolveError> {
        if self.settings.cache.no_cache {
            self.resolver.resolve_uncached(hostname).await
        } else {
            self.resolver.resolve(hostname).await
        }
    }
}

/// A successful attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub body: Bytes,
    pub status: u16,
    pub headers: HeadersMap,
    pub elapsed: Duration,
    /// Set when the response came from a different URL than requested
    pub final_url: Option<String>,
    pub was_compressed: bool,
    pub decompression: Option<Duration>,
    /// Whether the executor may store this outcome in the response cache
    pub cacheable: bool,
}

impl Outcome {
    pub fn was_redirected(&self) -> bool {
        self.final_url.is_some()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn to_cached(&self) -> CachedResponse {
        CachedResponse {
            body: self.body.clone(),
            status: self.status,
            headers: self.headers.clone(),
            elapsed: self.elapsed,
            final_url: self.final_url.clone(),
        }
    }
}

/// Protocol backend selected by URI scheme
#[async_trait]
pub trait TransportBackend: Send + Sync {
    fn scheme(&self) -> &'static str;

    fn enabled(&self) -> bool {
        true
    }

    /// Perform one attempt; retries and caching are the caller's concern
    async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Outcome, TransportError>;
}
