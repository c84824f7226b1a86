//! Tracing setup and batch counters

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

use crate::request::Request;

/// Install the global subscriber; `RUST_LOG` wins over `default_filter`.
///
/// Calling it again once a subscriber is installed is a no-op.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Counters accumulated over every batch a manager runs
#[derive(Debug, Default)]
pub struct Metrics {
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_writes: AtomicU64,
    retries: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, request: &Request) {
        let result = &request.result;
        if result.is_success() {
            self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(counter = "requests_failed", "Metric incremented");
        }
        if result.was_cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        if result.was_cache_write {
            self.cache_writes.fetch_add(1, Ordering::Relaxed);
        }
        self.retries
            .fetch_add(u64::from(result.retry_count), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_succeeded: self.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub cache_hits: u64,
    pub cache_writes: u64,
    pub retries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{FetchError, FetchResult};
    use bytes::Bytes;

    #[test]
    fn test_record_counts() {
        let metrics = Metrics::new();

        let mut ok = Request::new("http://a");
        ok.result = FetchResult {
            content: Some(Bytes::from_static(b"x")),
            was_cache_write: true,
            retry_count: 1,
            ..FetchResult::default()
        };
        let mut failed = Request::new("gopher://b");
        failed.result = FetchResult::failed(FetchError::UnknownScheme("gopher".into()));

        metrics.record(&ok);
        metrics.record(&failed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_succeeded, 1);
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.cache_writes, 1);
        assert_eq!(snapshot.cache_hits, 0);
        assert_eq!(snapshot.retries, 1);
    }
}
