//! Batch scheduling
//!
//! A [`Manager`] collects requests, resolves each one's settings against the
//! configuration, picks a backend by URI scheme and runs every request on a
//! worker (in parallel, bounded by `engine.max_concurrency`, or one after
//! another). `execute` returns only once every request holds a result;
//! requests that cannot be dispatched fail individually.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::cache::{CacheError, CacheStore, open_store};
use crate::config::Config;
use crate::dns::{CachingResolver, NameResolver};
use crate::executor::RequestExecutor;
use crate::observability::{Metrics, MetricsSnapshot};
use crate::request::{FetchError, FetchResult, Request, RequestSettings};
use crate::transport::{BackendRegistry, TransportBackend, TransportError};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Cache setup failed: {0}")]
    Cache(#[from] CacheError),

    #[error("Backend setup failed: {0}")]
    Backend(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTimers {
    /// Opening the cache store and resolver
    pub cache_setup: Option<Duration>,
    /// Last `execute` call, dispatch to final join
    pub total_runtime: Option<Duration>,
}

/// Totals over the requests currently held
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub timed_out: usize,
    pub bytes: u64,
}

impl BatchSummary {
    pub fn from_requests(requests: &[Request]) -> Self {
        requests.iter().fold(Self::default(), |mut summary, request| {
            let result = &request.result;
            summary.total += 1;
            if result.is_success() {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            if result.was_cache_hit {
                summary.cache_hits += 1;
            }
            if result.error.as_ref().is_some_and(FetchError::is_timeout) {
                summary.timed_out += 1;
            }
            summary.bytes += result.content.as_ref().map_or(0, |c| c.len() as u64);
            summary
        })
    }
}

pub struct Manager {
    config: Config,
    registry: Arc<BackendRegistry>,
    executor: RequestExecutor,
    metrics: Arc<Metrics>,
    requests: Vec<Request>,
    by_key: HashMap<String, usize>,
    timers: BatchTimers,
}

impl Manager {
    /// Manager with the configured cache store, a caching resolver and the
    /// built-in backends
    pub fn new(config: Config) -> Result<Self, ManagerError> {
        let started = Instant::now();
        let cache = open_store(&config.cache)?;
        let resolver: Arc<dyn NameResolver> =
            Arc::new(CachingResolver::new(cache.clone(), config.dns.ttl));
        let registry = BackendRegistry::with_defaults(&config.http, resolver.clone())?;

        let mut manager = Self::from_parts(config, cache, resolver, registry);
        manager.timers.cache_setup = Some(started.elapsed());
        info!(
            backend = ?manager.config.cache.backend,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cache ready"
        );
        Ok(manager)
    }

    pub fn from_parts(
        config: Config,
        cache: Arc<dyn CacheStore>,
        resolver: Arc<dyn NameResolver>,
        registry: BackendRegistry,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            executor: RequestExecutor::new(cache, resolver),
            metrics: Arc::new(Metrics::new()),
            requests: Vec::new(),
            by_key: HashMap::new(),
            timers: BatchTimers::default(),
        }
    }

    /// Queue a request; a bare source string builds one with default options.
    ///
    /// A later request with an existing key takes over that key.
    pub fn add(&mut self, request: impl Into<Request>) -> &mut Self {
        let request = request.into();
        if let Some(key) = &request.key {
            self.by_key.insert(key.clone(), self.requests.len());
        }
        self.requests.push(request);
        self
    }

    pub fn get_request_by_key(&self, key: &str) -> Option<&Request> {
        self.by_key.get(key).and_then(|&index| self.requests.get(index))
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn into_requests(self) -> Vec<Request> {
        self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Drop all requests so the manager can run a new batch
    pub fn reset(&mut self) {
        self.requests.clear();
        self.by_key.clear();
        self.timers.total_runtime = None;
    }

    pub fn timers(&self) -> BatchTimers {
        self.timers
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary::from_requests(&self.requests)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every held request, in parallel or in insertion order
    pub async fn execute(&mut self, parallel: bool) -> &[Request] {
        let started = Instant::now();
        let requests = std::mem::take(&mut self.requests);
        let total = requests.len();
        info!(total, parallel, "Executing batch");

        let mut slots: Vec<Option<Request>> = (0..total).map(|_| None).collect();
        let mut pending: HashMap<tokio::task::Id, (usize, Request)> = HashMap::new();
        let semaphore = Arc::new(Semaphore::new(self.config.engine.max_concurrency.max(1)));
        let mut workers = JoinSet::new();

        for (index, mut request) in requests.into_iter().enumerate() {
            let settings = RequestSettings::resolve(
                &self.config.engine,
                &self.config.request_defaults,
                &request,
            );
            let backend = match self.backend_for(&request) {
                Ok(backend) => backend,
                Err(err) => {
                    warn!(
                        request_id = %request.id,
                        source = %request.source,
                        error = %err,
                        "Request not dispatched"
                    );
                    request.result = FetchResult::failed(err);
                    slots[index] = Some(request);
                    continue;
                }
            };

            let executor = self.executor.clone();
            let semaphore = semaphore.clone();
            let template = request.clone();
            let handle = workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                executor
                    .execute(&mut request, backend.as_ref(), &settings)
                    .await;
                (index, request)
            });
            pending.insert(handle.id(), (index, template));

            if !parallel {
                if let Some(joined) = workers.join_next_with_id().await {
                    settle(joined, &mut pending, &mut slots);
                }
            }
        }

        while let Some(joined) = workers.join_next_with_id().await {
            settle(joined, &mut pending, &mut slots);
        }

        self.requests = slots.into_iter().flatten().collect();
        self.reindex();
        for request in &self.requests {
            self.metrics.record(request);
        }

        let elapsed = started.elapsed();
        self.timers.total_runtime = Some(elapsed);
        let summary = self.summary();
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cache_hits = summary.cache_hits,
            timed_out = summary.timed_out,
            bytes = summary.bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Batch complete"
        );

        &self.requests
    }

    fn backend_for(&self, request: &Request) -> Result<Arc<dyn TransportBackend>, FetchError> {
        let scheme = request.scheme().ok_or_else(|| {
            FetchError::from(TransportError::InvalidSource(format!(
                "{}: missing scheme",
                request.source
            )))
        })?;
        Ok(self.registry.get(&scheme)?)
    }

    fn reindex(&mut self) {
        self.by_key = self
            .requests
            .iter()
            .enumerate()
            .filter_map(|(index, request)| request.key.clone().map(|key| (key, index)))
            .collect();
    }
}

type Joined = Result<(tokio::task::Id, (usize, Request)), tokio::task::JoinError>;

/// Put a finished worker's request back in its slot
fn settle(
    joined: Joined,
    pending: &mut HashMap<tokio::task::Id, (usize, Request)>,
    slots: &mut [Option<Request>],
) {
    match joined {
        Ok((id, (index, request))) => {
            pending.remove(&id);
            slots[index] = Some(request);
        }
        Err(err) => {
            if let Some((index, mut request)) = pending.remove(&err.id()) {
                error!(request_id = %request.id, error = %err, "Worker aborted");
                request.result = FetchResult::failed(FetchError::WorkerAborted(err.to_string()));
                slots[index] = Some(request);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::dns::StaticResolver;
    use crate::transport::{FetchContext, Outcome};
    use async_trait::async_trait;
    use bytes::Bytes;

    /// Answers every request with its own source after a short delay
    struct Echo;

    #[async_trait]
    impl TransportBackend for Echo {
        fn scheme(&self) -> &'static str {
            "echo"
        }

        async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Outcome, TransportError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Outcome {
                body: Bytes::from(ctx.request.source.clone()),
                status: 200,
                headers: Default::default(),
                elapsed: Duration::from_millis(200),
                final_url: None,
                was_compressed: false,
                decompression: None,
                cacheable: true,
            })
        }
    }

    struct Panics;

    #[async_trait]
    impl TransportBackend for Panics {
        fn scheme(&self) -> &'static str {
            "panic"
        }

        async fn fetch(&self, _ctx: &FetchContext<'_>) -> Result<Outcome, TransportError> {
            panic!("backend bug");
        }
    }

    fn manager() -> Manager {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(Panics));
        Manager::from_parts(
            Config::default(),
            Arc::new(MemoryCacheStore::default()),
            Arc::new(StaticResolver::new()),
            registry,
        )
    }

    #[tokio::test]
    async fn test_parallel_batch_with_unknown_scheme() {
        let mut manager = manager();
        manager
            .add(Request::builder().source("echo://one").key("one").build())
            .add("gopher://nowhere")
            .add(Request::builder().source("echo://two").key("two").build());

        let started = Instant::now();
        let requests = manager.execute(true).await;
        let elapsed = started.elapsed();

        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].text().unwrap(), "echo://one");
        assert_eq!(
            requests[1].result.error,
            Some(FetchError::UnknownScheme("gopher".into()))
        );
        assert_eq!(requests[2].text().unwrap(), "echo://two");
        assert!(elapsed < Duration::from_millis(390), "took {elapsed:?}");

        let summary = manager.summary();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert!(manager.timers().total_runtime.is_some());
    }

    #[tokio::test]
    async fn test_serial_batch_runs_in_order() {
        let mut manager = manager();
        manager.add("echo://a").add("echo://b");

        let started = Instant::now();
        let requests = manager.execute(false).await;

        assert!(started.elapsed() >= Duration::from_millis(400));
        let bodies: Vec<String> = requests
            .iter()
            .map(|r| r.text().unwrap().into_owned())
            .collect();
        assert_eq!(bodies, vec!["echo://a", "echo://b"]);
    }

    #[tokio::test]
    async fn test_keyed_lookup_and_reset() {
        let mut manager = manager();
        manager.add(Request::builder().source("echo://k").key("k").build());
        manager.execute(true).await;

        let request = manager.get_request_by_key("k").unwrap();
        assert_eq!(request.text().unwrap(), "echo://k");
        assert!(manager.get_request_by_key("missing").is_none());

        manager.reset();
        assert!(manager.is_empty());
        assert!(manager.get_request_by_key("k").is_none());
        assert!(manager.timers().total_runtime.is_none());
        assert_eq!(manager.metrics().requests_succeeded, 1);
    }

    #[tokio::test]
    async fn test_missing_scheme_fails_request() {
        let mut manager = manager();
        manager.add("no-scheme-here");
        let requests = manager.execute(true).await;
        assert!(matches!(
            requests[0].result.error,
            Some(FetchError::Transport(TransportError::InvalidSource(_)))
        ));
    }

    #[tokio::test]
    async fn test_panicking_worker_does_not_lose_request() {
        let mut manager = manager();
        manager.add("panic://boom").add("echo://fine");

        let requests = manager.execute(true).await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].source, "panic://boom");
        assert!(matches!(
            requests[0].result.error,
            Some(FetchError::WorkerAborted(_))
        ));
        assert!(requests[1].is_success());
    }

    #[tokio::test]
    async fn test_panicking_worker_serial() {
        let mut manager = manager();
        manager
            .add("echo://before")
            .add("panic://boom")
            .add(Request::builder().source("echo://after").key("after").build());

        let requests = manager.execute(false).await;
        assert_eq!(requests.len(), 3);
        assert!(requests[0].is_success());
        assert_eq!(requests[1].source, "panic://boom");
        assert!(matches!(
            requests[1].result.error,
            Some(FetchError::WorkerAborted(_))
        ));
        assert_eq!(requests[2].text().unwrap(), "echo://after");
        assert!(manager.get_request_by_key("after").is_some());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut config = Config::default();
        config.engine.max_concurrency = 1;
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(Echo));
        let mut manager = Manager::from_parts(
            config,
            Arc::new(MemoryCacheStore::default()),
            Arc::new(StaticResolver::new()),
            registry,
        );
        manager.add("echo://1").add("echo://2");

        let started = Instant::now();
        manager.execute(true).await;
        assert!(started.elapsed() >= Duration::from_millis(400));
    }
}
