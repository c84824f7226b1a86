use bon::Builder;
use bytes::Bytes;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::error::FetchError;
use crate::cache::HeadersMap;

/// HTTP verbs a request may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "PATCH" => Ok(Self::Patch),
            other => Err(format!("unsupported method: {other}")),
        }
    }
}

/// One unit of work: a source URI, its options and, after execution, its result
///
/// Options left as `None` fall back to the batch configuration when the
/// request is dispatched.
#[derive(Debug, Clone, Builder)]
pub struct Request {
    #[builder(skip = Uuid::now_v7())]
    pub id: Uuid,

    #[builder(into)]
    pub source: String,

    /// Caller-chosen handle for [`crate::Manager::get_request_by_key`]
    #[builder(into)]
    pub key: Option<String>,

    #[builder(default)]
    pub method: HttpMethod,
    #[builder(default)]
    pub headers: HeadersMap,
    /// A body disables caching for the request
    #[builder(into)]
    pub body: Option<Bytes>,
    /// Charset the body is sent in (`utf-8` or `latin-1`)
    #[builder(into)]
    pub encoding: Option<String>,
    #[builder(into)]
    pub username: Option<String>,
    #[builder(into)]
    pub password: Option<String>,

    #[builder(into)]
    pub ftp_cwd: Option<String>,
    /// Selects which listed files are retrieved
    pub ftp_file_pattern: Option<regex::Regex>,
    #[builder(into)]
    pub ftp_output_dir: Option<PathBuf>,

    pub no_cache: Option<bool>,
    pub force_recache: Option<bool>,
    pub accept_compressed: Option<bool>,
    pub cache_ttl: Option<Duration>,
    pub cache_staleness_threshold: Option<Duration>,
    /// Hard limit for a single attempt
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,

    /// At least one must match the body, when any are given
    #[builder(default)]
    pub validators: Vec<Regex>,
    /// None may match the body
    #[builder(default)]
    pub invalidators: Vec<Regex>,

    /// Every attempt fails with a timeout and no network traffic
    #[builder(default)]
    pub fail_flag: bool,

    #[builder(skip)]
    pub result: FetchResult,
}

impl Request {
    pub fn new(source: impl Into<String>) -> Self {
        Self::builder().source(source).build()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// URI scheme of the source, lowercased
    pub fn scheme(&self) -> Option<String> {
        let (scheme, _) = self.source.split_once("://")?;
        let valid = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        valid.then(|| scheme.to_ascii_lowercase())
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.result.content.as_ref()
    }

    pub fn text(&self) -> Option<Cow<'_, str>> {
        self.content().map(|body| String::from_utf8_lossy(body))
    }

    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

impl From<&str> for Request {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<String> for Request {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}

/// Outcome of executing a request
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub content: Option<Bytes>,
    pub status_code: Option<u16>,
    pub response_headers: HeadersMap,
    /// Network response time, or the one recorded with the cached response
    pub elapsed: Option<Duration>,
    pub error: Option<FetchError>,
    /// Failed attempts
    pub retry_count: u32,
    pub was_cache_hit: bool,
    pub cache_is_fresh: bool,
    pub was_cache_write: bool,
    pub was_redirected: bool,
    pub redirect_url: Option<String>,
    pub was_compressed: bool,
    pub regex_invalidated: bool,
    /// The request ended on a transport failure with nothing cached to serve
    pub network_error: bool,
    pub timings: Timings,
}

impl FetchResult {
    pub fn failed(error: FetchError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.content.is_some()
    }
}

/// Time spent in each phase of execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timings {
    pub cache_read: Option<Duration>,
    pub cache_write: Option<Duration>,
    pub decompression: Option<Duration>,
    /// Summed over every attempt
    pub network: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let request = Request::builder().source("http://example.com/").build();
        assert_eq!(request.method, HttpMethod::Get);
        assert!(request.key.is_none());
        assert!(request.no_cache.is_none());
        assert!(!request.fail_flag);
        assert!(request.result.content.is_none());
        assert_eq!(request.id.get_version_num(), 7);
    }

    #[test]
    fn test_builder_options() {
        let request = Request::builder()
            .source("https://example.com/search")
            .key("search")
            .method(HttpMethod::Post)
            .body(Bytes::from_static(b"q=rust"))
            .no_cache(true)
            .timeout(Duration::from_secs(2))
            .validators(vec![Regex::new("results").unwrap()])
            .build();

        assert_eq!(request.key.as_deref(), Some("search"));
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.timeout, Some(Duration::from_secs(2)));
        assert_eq!(request.validators.len(), 1);
    }

    #[test]
    fn test_scheme_parsing() {
        assert_eq!(Request::new("HTTP://example.com").scheme().as_deref(), Some("http"));
        assert_eq!(Request::new("ftp://host/dir").scheme().as_deref(), Some("ftp"));
        assert_eq!(Request::new("gopher://host").scheme().as_deref(), Some("gopher"));
        assert_eq!(Request::new("example.com/page").scheme(), None);
        assert_eq!(Request::new("://missing").scheme(), None);
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("TRACE".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Request::new("http://a");
        let b = Request::new("http://a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_failed_result() {
        let result = FetchResult::failed(FetchError::UnknownScheme("gopher".into()));
        assert!(!result.is_success());
        assert!(result.content.is_none());
    }
}
