//! HTTP(S) backend

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, CONTENT_ENCODING, HeaderMap, HeaderName, HeaderValue,
};
use reqwest::{Client, Method, Url, redirect::Policy};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::decode::{ContentEncoding, check_body, decode_body};
use super::error::TransportError;
use super::traits::{FetchContext, Outcome, TransportBackend};
use crate::cache::HeadersMap;
use crate::config::HttpConfig;
use crate::dns::{NameResolver, ResolveError};
use crate::request::{HttpMethod, Request};

const DEFAULT_ACCEPT: &str = "text/html, text/plain, */*";
const SUPPORTED_ENCODINGS: &str = "gzip, compress, deflate";

/// Fetches `http://` and `https://` sources
///
/// Both clients connect to addresses from the batch resolver, while the URL
/// (and so the `Host` header and TLS name) keeps the original hostname.
/// `direct` serves requests that bypass the cache.
pub struct HttpBackend {
    config: HttpConfig,
    client: Client,
    direct: Client,
}

impl HttpBackend {
    pub fn new(config: HttpConfig, resolver: Arc<dyn NameResolver>) -> Result<Self, TransportError> {
        let client = build_client(&config, BatchDns::new(resolver.clone(), true))?;
        let direct = build_client(&config, BatchDns::new(resolver, false))?;
        Ok(Self {
            config,
            client,
            direct,
        })
    }

    fn classify(&self, err: reqwest::Error, timeout: Duration) -> TransportError {
        if let Some(resolve) = resolve_failure(&err) {
            resolve.into()
        } else if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if err.is_redirect() {
            TransportError::RedirectLimitExceeded {
                limit: self.config.max_redirects,
            }
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Protocol(err.to_string())
        }
    }
}

fn build_client(config: &HttpConfig, dns: BatchDns) -> Result<Client, TransportError> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(&config.user_agent)
        .redirect(Policy::limited(config.max_redirects))
        .no_proxy()
        .dns_resolver(Arc::new(dns))
        .build()
        .map_err(|e| TransportError::Protocol(format!("client setup failed: {e}")))
}

/// Connection-level name lookup through a [`NameResolver`]
struct BatchDns {
    resolver: Arc<dyn NameResolver>,
    memoize: bool,
}

impl BatchDns {
    fn new(resolver: Arc<dyn NameResolver>, memoize: bool) -> Self {
        Self { resolver, memoize }
    }
}

impl Resolve for BatchDns {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.resolver.clone();
        let memoize = self.memoize;
        Box::pin(async move {
            let ip = if memoize {
                resolver.resolve(name.as_str()).await?
            } else {
                resolver.resolve_uncached(name.as_str()).await?
            };
            // Port 0 keeps the port from the URL
            let addrs: Addrs = Box::new(std::iter::once(SocketAddr::new(ip, 0)));
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

fn resolve_failure(err: &reqwest::Error) -> Option<ResolveError> {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(resolve) = cause.downcast_ref::<ResolveError>() {
            return Some(resolve.clone());
        }
        source = cause.source();
    }
    None
}

#[async_trait]
impl TransportBackend for HttpBackend {
    fn scheme(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Outcome, TransportError> {
        let request = ctx.request;
        let timeout = ctx.settings.timeout;

        let url = Url::parse(&request.source)
            .map_err(|e| TransportError::InvalidSource(format!("{}: {e}", request.source)))?;
        if url.host_str().is_none() {
            return Err(TransportError::InvalidSource(format!(
                "{}: no host",
                request.source
            )));
        }

        let client = if ctx.settings.cache.no_cache {
            &self.direct
        } else {
            &self.client
        };
        let mut builder = client
            .request(method(request.method), url.clone())
            .timeout(timeout)
            .headers(assemble_headers(request, ctx.settings.accept_compressed)?);
        if let Some(username) = &request.username {
            builder = builder.basic_auth(username, request.password.as_ref());
        }
        if let Some(body) = encode_body(request)? {
            builder = builder.body(body);
        }

        debug!(request_id = %request.id, url = %url, "Sending request");
        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| self.classify(e, timeout))?;
        let status = response.status();
        let final_url = (response.url() != &url).then(|| response.url().to_string());
        let headers = collect_headers(response.headers());
        let encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map(ContentEncoding::from_header)
            .unwrap_or(ContentEncoding::Identity);
        let raw = response
            .bytes()
            .await
            .map_err(|e| self.classify(e, timeout))?;
        let elapsed = started.elapsed();

        if status.is_client_error() || status.is_server_error() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        let decode_started = Instant::now();
        let body = decode_body(encoding, raw)?;
        let was_compressed = encoding != ContentEncoding::Identity;
        let decompression = was_compressed.then(|| decode_started.elapsed());

        check_body(request, &body)?;

        debug!(
            request_id = %request.id,
            status = status.as_u16(),
            size = body.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Response received"
        );

        Ok(Outcome {
            body,
            status: status.as_u16(),
            headers,
            elapsed,
            final_url,
            was_compressed,
            decompression,
            cacheable: status.is_success(),
        })
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Patch => Method::PATCH,
    }
}

/// Caller headers plus the defaults they did not set
fn assemble_headers(request: &Request, accept_compressed: bool) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidSource(format!("header name {name}: {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidSource(format!("header {name}: {e}")))?;
        headers.insert(header_name, header_value);
    }

    headers
        .entry(ACCEPT)
        .or_insert(HeaderValue::from_static(DEFAULT_ACCEPT));
    if accept_compressed {
        headers
            .entry(ACCEPT_ENCODING)
            .or_insert(HeaderValue::from_static(SUPPORTED_ENCODINGS));
    }
    Ok(headers)
}

fn collect_headers(headers: &HeaderMap) -> HeadersMap {
    let mut collected = HeadersMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        collected
            .entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    collected
}

/// Body bytes in the requested charset
fn encode_body(request: &Request) -> Result<Option<Bytes>, TransportError> {
    let Some(body) = &request.body else {
        return Ok(None);
    };
    let encoding = request
        .encoding
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "utf-8".to_string());

    match encoding.as_str() {
        "utf-8" | "utf8" => Ok(Some(body.clone())),
        "latin-1" | "latin1" | "iso-8859-1" => {
            let text = std::str::from_utf8(body)
                .map_err(|e| TransportError::InvalidSource(format!("body is not text: {e}")))?;
            let encoded = text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        TransportError::InvalidSource(format!("{c:?} is not representable in latin-1"))
                    })
                })
                .collect::<Result<Vec<u8>, _>>()?;
            Ok(Some(Bytes::from(encoded)))
        }
        other => Err(TransportError::InvalidSource(format!(
            "unsupported body encoding: {other}"
        ))),
    }
}
