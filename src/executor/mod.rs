//! Single-request execution
//!
//! For each request: consult the cache, fall through to the backend with a
//! bounded number of attempts, serve a retained cache entry if every attempt
//! failed, and store successful responses. The outcome is written to the
//! request's [`FetchResult`]; nothing is returned.

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::{
    CacheDecision, CacheEntry, CacheStore, CachedResponse, FreshnessPolicy,
};
use crate::dns::NameResolver;
use crate::request::{FetchResult, Request, RequestSettings, Timings};
use crate::transport::{FetchContext, Outcome, TransportBackend, TransportError};

/// Runs one request against a backend with the shared cache and resolver
#[derive(Clone)]
pub struct RequestExecutor {
    cache: Arc<dyn CacheStore>,
    resolver: Arc<dyn NameResolver>,
}

impl RequestExecutor {
    pub fn new(cache: Arc<dyn CacheStore>, resolver: Arc<dyn NameResolver>) -> Self {
        Self { cache, resolver }
    }

    pub async fn execute(
        &self,
        request: &mut Request,
        backend: &dyn TransportBackend,
        settings: &RequestSettings,
    ) {
        let mut result = FetchResult::default();

        let cached = if settings.cache.no_cache {
            None
        } else {
            self.read_cache(request, &mut result.timings).await
        };

        let decision = FreshnessPolicy::decide(cached.as_ref(), Utc::now(), settings.cache);
        let fallback = match (decision, cached) {
            (CacheDecision::Hit, Some(entry)) => {
                debug!(request_id = %request.id, source = %request.source, "Serving fresh cache entry");
                serve_cached(&mut result, entry.payload, true);
                request.result = result;
                return;
            }
            (_, cached) => cached,
        };

        let attempts = settings.attempts();
        let mut attempt = 0;
        let mut network_time = Duration::ZERO;
        let error = loop {
            attempt += 1;
            let started = Instant::now();
            let outcome = self.attempt(request, backend, settings).await;
            network_time += started.elapsed();

            match outcome {
                Ok(outcome) => {
                    result.timings.network = Some(network_time);
                    self.apply_outcome(request, settings, outcome, &mut result)
                        .await;
                    request.result = result;
                    return;
                }
                Err(err) => {
                    result.retry_count += 1;
                    match &err {
                        TransportError::ValidationFailure(_) => result.regex_invalidated = true,
                        TransportError::Status { status } => result.status_code = Some(*status),
                        _ => {}
                    }
                    if attempt >= attempts || !err.is_retryable() {
                        break err;
                    }
                    warn!(
                        request_id = %request.id,
                        source = %request.source,
                        attempt,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                }
            }
        };
        result.timings.network = Some(network_time);

        match fallback {
            Some(entry) => {
                warn!(
                    request_id = %request.id,
                    source = %request.source,
                    attempts = attempt,
                    error = %error,
                    "All attempts failed, serving stale cache entry"
                );
                serve_cached(&mut result, entry.payload, false);
            }
            None => {
                warn!(
                    request_id = %request.id,
                    source = %request.source,
                    attempts = attempt,
                    error = %error,
                    "Request failed"
                );
                result.network_error = true;
                result.error = Some(error.into());
            }
        }
        request.result = result;
    }

    /// One bounded attempt
    async fn attempt(
        &self,
        request: &Request,
        backend: &dyn TransportBackend,
        settings: &RequestSettings,
    ) -> Result<Outcome, TransportError> {
        if request.fail_flag {
            return Err(TransportError::Timeout(settings.timeout));
        }

        let ctx = FetchContext {
            request,
            settings,
            resolver: self.resolver.as_ref(),
        };
        tokio::time::timeout(settings.timeout, backend.fetch(&ctx))
            .await
            .unwrap_or(Err(TransportError::Timeout(settings.timeout)))
    }

    async fn read_cache(
        &self,
        request: &Request,
        timings: &mut Timings,
    ) -> Option<CacheEntry<CachedResponse>> {
        let started = Instant::now();
        let entry = self.cache.read(&request.source).await.and_then(|entry| {
            entry
                .map(|entry| entry.try_map(|bytes: Bytes| CachedResponse::decode(&bytes)))
                .transpose()
        });
        timings.cache_read = Some(started.elapsed());

        match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "Cache read failed, fetching from network");
                None
            }
        }
    }

    async fn apply_outcome(
        &self,
        request: &Request,
        settings: &RequestSettings,
        outcome: Outcome,
        result: &mut FetchResult,
    ) {
        if !settings.cache.no_cache && outcome.cacheable && outcome.is_success() {
            let started = Instant::now();
            match self
                .cache
                .write(
                    &request.source,
                    outcome.to_cached().encode(),
                    settings.cache_ttl,
                    settings.staleness_threshold,
                )
                .await
            {
                Ok(storage_key) => {
                    result.was_cache_write = true;
                    debug!(request_id = %request.id, storage_key, "Response cached");
                }
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "Cache write failed");
                }
            }
            result.timings.cache_write = Some(started.elapsed());
        }

        info!(
            request_id = %request.id,
            source = %request.source,
            status = outcome.status,
            size = outcome.body.len(),
            retries = result.retry_count,
            "Fetched"
        );

        result.was_redirected = outcome.was_redirected();
        result.redirect_url = outcome.final_url;
        result.was_compressed = outcome.was_compressed;
        result.timings.decompression = outcome.decompression;
        result.status_code = Some(outcome.status);
        result.response_headers = outcome.headers;
        result.elapsed = Some(outcome.elapsed);
        result.content = Some(outcome.body);
    }
}

fn serve_cached(result: &mut FetchResult, response: CachedResponse, fresh: bool) {
    result.was_cache_hit = true;
    result.cache_is_fresh = fresh;
    result.was_redirected = response.final_url.is_some();
    result.redirect_url = response.final_url;
    result.status_code = Some(response.status);
    result.response_headers = response.headers;
    result.elapsed = Some(response.elapsed);
    result.content = Some(response.body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, CacheFlags, HeadersMap, MemoryCacheStore};
    use crate::dns::StaticResolver;
    use crate::request::FetchError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SOURCE: &str = "http://origin.test/page";

    /// Backend replaying a fixed list of attempt results
    struct Scripted {
        script: Mutex<VecDeque<Result<Outcome, TransportError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(script: Vec<Result<Outcome, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransportBackend for Scripted {
        fn scheme(&self) -> &'static str {
            "http"
        }

        async fn fetch(&self, _ctx: &FetchContext<'_>) -> Result<Outcome, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connect("script exhausted".into())))
        }
    }

    struct Sleeper;

    #[async_trait]
    impl TransportBackend for Sleeper {
        fn scheme(&self) -> &'static str {
            "http"
        }

        async fn fetch(&self, _ctx: &FetchContext<'_>) -> Result<Outcome, TransportError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(outcome(b"late"))
        }
    }

    /// Store whose every operation fails
    struct Broken;

    #[async_trait]
    impl CacheStore for Broken {
        async fn read(&self, _key: &str) -> crate::cache::Result<Option<CacheEntry<Bytes>>> {
            Err(CacheError::Corrupt("broken".into()))
        }

        async fn write(
            &self,
            _key: &str,
            _payload: Bytes,
            _ttl: Duration,
            _staleness_threshold: Duration,
        ) -> crate::cache::Result<String> {
            Err(CacheError::Corrupt("broken".into()))
        }

        async fn delete(&self, _key: &str) -> crate::cache::Result<()> {
            Ok(())
        }
    }

    fn outcome(body: &'static [u8]) -> Outcome {
        Outcome {
            body: Bytes::from_static(body),
            status: 200,
            headers: HeadersMap::from([("content-type".to_string(), "text/html".to_string())]),
            elapsed: Duration::from_millis(3),
            final_url: None,
            was_compressed: false,
            decompression: None,
            cacheable: true,
        }
    }

    fn settings(cache: CacheFlags, max_retries: u32) -> RequestSettings {
        RequestSettings {
            cache,
            accept_compressed: true,
            cache_ttl: Duration::from_secs(60),
            staleness_threshold: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
            max_retries,
        }
    }

    fn executor(cache: Arc<dyn CacheStore>) -> RequestExecutor {
        RequestExecutor::new(cache, Arc::new(StaticResolver::new()))
    }

    async fn seed(cache: &MemoryCacheStore, body: &'static [u8], ttl: Duration) {
        let response = outcome(body).to_cached();
        cache
            .write(SOURCE, response.encode(), ttl, Duration::ZERO)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_network() {
        let cache = Arc::new(MemoryCacheStore::default());
        seed(&cache, b"cached", Duration::from_secs(600)).await;
        let backend = Scripted::new(vec![Ok(outcome(b"network"))]);
        let mut request = Request::new(SOURCE);

        executor(cache)
            .execute(&mut request, &backend, &settings(CacheFlags::default(), 1))
            .await;

        assert_eq!(backend.calls(), 0);
        assert_eq!(request.content().unwrap(), &Bytes::from_static(b"cached"));
        assert!(request.result.was_cache_hit);
        assert!(request.result.cache_is_fresh);
        assert_eq!(request.result.status_code, Some(200));
    }

    #[tokio::test]
    async fn test_miss_fetches_and_caches() {
        let cache = Arc::new(MemoryCacheStore::default());
        let backend = Scripted::new(vec![Ok(outcome(b"network"))]);
        let mut request = Request::new(SOURCE);

        executor(cache.clone())
            .execute(&mut request, &backend, &settings(CacheFlags::default(), 1))
            .await;

        assert_eq!(backend.calls(), 1);
        assert!(request.is_success());
        assert!(request.result.was_cache_write);
        assert!(!request.result.was_cache_hit);
        assert_eq!(request.result.retry_count, 0);
        assert!(request.result.timings.network.is_some());

        let stored = cache.read(SOURCE).await.unwrap().unwrap();
        assert_eq!(
            CachedResponse::decode(&stored.payload).unwrap().body,
            Bytes::from_static(b"network")
        );
    }

    #[tokio::test]
    async fn test_no_cache_never_touches_store() {
        let cache = Arc::new(MemoryCacheStore::default());
        let backend = Scripted::new(vec![Ok(outcome(b"network"))]);
        let mut request = Request::new(SOURCE);
        let flags = CacheFlags {
            no_cache: true,
            force_recache: false,
        };

        executor(cache.clone())
            .execute(&mut request, &backend, &settings(flags, 1))
            .await;

        assert!(request.is_success());
        assert!(!request.result.was_cache_write);
        let stats = cache.stats().await;
        assert_eq!(stats.reads, 0);
        assert_eq!(stats.writes, 0);
        assert!(request.result.timings.cache_read.is_none());
    }

    #[tokio::test]
    async fn test_force_recache_overwrites_fresh_entry() {
        let cache = Arc::new(MemoryCacheStore::default());
        seed(&cache, b"old", Duration::from_secs(600)).await;
        let backend = Scripted::new(vec![Ok(outcome(b"new"))]);
        let mut request = Request::new(SOURCE);
        let flags = CacheFlags {
            no_cache: false,
            force_recache: true,
        };

        executor(cache.clone())
            .execute(&mut request, &backend, &settings(flags, 1))
            .await;

        assert_eq!(backend.calls(), 1);
        assert_eq!(request.content().unwrap(), &Bytes::from_static(b"new"));
        assert!(request.result.was_cache_write);
        let stored = cache.read(SOURCE).await.unwrap().unwrap();
        assert_eq!(
            CachedResponse::decode(&stored.payload).unwrap().body,
            Bytes::from_static(b"new")
        );
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let cache = Arc::new(MemoryCacheStore::default());
        let backend = Scripted::new(vec![
            Err(TransportError::Connect("refused".into())),
            Ok(outcome(b"second")),
        ]);
        let mut request = Request::new(SOURCE);

        executor(cache)
            .execute(&mut request, &backend, &settings(CacheFlags::default(), 1))
            .await;

        assert_eq!(backend.calls(), 2);
        assert!(request.is_success());
        assert_eq!(request.result.retry_count, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_serve_stale_entry() {
        let cache = Arc::new(MemoryCacheStore::default());
        seed(&cache, b"stale", Duration::ZERO).await;
        let backend = Scripted::new(vec![]);
        let mut request = Request::new(SOURCE);

        executor(cache)
            .execute(&mut request, &backend, &settings(CacheFlags::default(), 1))
            .await;

        assert_eq!(backend.calls(), 2);
        assert_eq!(request.content().unwrap(), &Bytes::from_static(b"stale"));
        assert!(request.result.was_cache_hit);
        assert!(!request.result.cache_is_fresh);
        assert!(request.result.error.is_none());
        assert!(!request.result.network_error);
        assert_eq!(request.result.retry_count, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_without_fallback() {
        let cache = Arc::new(MemoryCacheStore::default());
        let backend = Scripted::new(vec![]);
        let mut request = Request::new(SOURCE);

        executor(cache)
            .execute(&mut request, &backend, &settings(CacheFlags::default(), 2))
            .await;

        assert_eq!(backend.calls(), 3);
        assert!(request.content().is_none());
        assert!(request.result.network_error);
        assert!(matches!(
            request.result.error,
            Some(FetchError::Transport(TransportError::Connect(_)))
        ));
        assert_eq!(request.result.retry_count, 3);
    }

    #[tokio::test]
    async fn test_validation_failure_is_retried() {
        let cache = Arc::new(MemoryCacheStore::default());
        let backend = Scripted::new(vec![
            Err(TransportError::ValidationFailure("no validator matched".into())),
            Err(TransportError::ValidationFailure("no validator matched".into())),
        ]);
        let mut request = Request::new(SOURCE);

        executor(cache)
            .execute(&mut request, &backend, &settings(CacheFlags::default(), 1))
            .await;

        assert_eq!(backend.calls(), 2);
        assert!(request.result.regex_invalidated);
        assert!(request.content().is_none());
    }

    #[tokio::test]
    async fn test_invalid_source_is_not_retried() {
        let cache = Arc::new(MemoryCacheStore::default());
        let backend = Scripted::new(vec![Err(TransportError::InvalidSource("bad".into()))]);
        let mut request = Request::new(SOURCE);

        executor(cache)
            .execute(&mut request, &backend, &settings(CacheFlags::default(), 3))
            .await;

        assert_eq!(backend.calls(), 1);
        assert_eq!(request.result.retry_count, 1);
    }

    #[tokio::test]
    async fn test_uncacheable_outcome_is_not_stored() {
        let cache = Arc::new(MemoryCacheStore::default());
        let backend = Scripted::new(vec![Ok(Outcome {
            cacheable: false,
            ..outcome(b"listing")
        })]);
        let mut request = Request::new(SOURCE);

        executor(cache.clone())
            .execute(&mut request, &backend, &settings(CacheFlags::default(), 0))
            .await;

        assert!(request.is_success());
        assert!(!request.result.was_cache_write);
        assert_eq!(cache.stats().await.writes, 0);
    }

    #[tokio::test]
    async fn test_fail_flag_skips_backend() {
        let cache = Arc::new(MemoryCacheStore::default());
        let backend = Scripted::new(vec![Ok(outcome(b"unused"))]);
        let mut request = Request::builder().source(SOURCE).fail_flag(true).build();

        executor(cache)
            .execute(&mut request, &backend, &settings(CacheFlags::default(), 1))
            .await;

        assert_eq!(backend.calls(), 0);
        assert!(request.result.error.as_ref().unwrap().is_timeout());
        assert_eq!(request.result.retry_count, 2);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_enforced() {
        let cache = Arc::new(MemoryCacheStore::default());
        let mut request = Request::new(SOURCE);
        let settings = RequestSettings {
            timeout: Duration::from_millis(50),
            ..settings(CacheFlags::default(), 0)
        };

        let started = Instant::now();
        executor(cache)
            .execute(&mut request, &Sleeper, &settings)
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(request.result.error.as_ref().unwrap().is_timeout());
    }

    #[tokio::test]
    async fn test_broken_store_degrades_to_network() {
        let backend = Scripted::new(vec![Ok(outcome(b"network"))]);
        let mut request = Request::new(SOURCE);

        executor(Arc::new(Broken))
            .execute(&mut request, &backend, &settings(CacheFlags::default(), 0))
            .await;

        assert!(request.is_success());
        assert!(!request.result.was_cache_write);
        assert!(request.result.error.is_none());
    }
}
