use clap::{Parser, Subcommand};
use fetchbatch::humanize::parse_duration;
use fetchbatch::{BatchSummary, Request};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "fetchbatch")]
#[command(about = "Fetch many sources in one cached batch", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $FETCHBATCH_CONFIG or config/fetchbatch.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch sources and report each result
    Fetch(FetchArgs),
    /// Drop expired entries from the persistent cache
    Prune,
}

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    /// Sources to fetch (http, https or ftp URLs)
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Run requests one after another
    #[arg(long)]
    pub serial: bool,

    /// Neither read nor write the cache
    #[arg(long)]
    pub no_cache: bool,

    /// Ignore fresh cache entries and overwrite them
    #[arg(long)]
    pub recache: bool,

    /// Per-attempt timeout, e.g. `500ms` or `10s`
    #[arg(long, value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    #[arg(long)]
    pub retries: Option<u32>,

    /// Print response bodies after the report
    #[arg(long)]
    pub body: bool,

    /// Emit the report as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    parse_duration(value).map_err(|e| e.to_string())
}

#[derive(Debug, Serialize)]
pub struct BatchReport<'a> {
    pub summary: BatchSummary,
    pub requests: Vec<RequestReport<'a>>,
}

#[derive(Debug, Serialize)]
pub struct RequestReport<'a> {
    pub source: &'a str,
    pub status: Option<u16>,
    pub bytes: usize,
    pub cache_hit: bool,
    pub cache_fresh: bool,
    pub cache_write: bool,
    pub redirected_to: Option<&'a str>,
    pub compressed: bool,
    pub retries: u32,
    pub elapsed_ms: Option<u64>,
    pub error: Option<String>,
}

impl<'a> From<&'a Request> for RequestReport<'a> {
    fn from(request: &'a Request) -> Self {
        let result = &request.result;
        Self {
            source: &request.source,
            status: result.status_code,
            bytes: result.content.as_ref().map_or(0, |c| c.len()),
            cache_hit: result.was_cache_hit,
            cache_fresh: result.cache_is_fresh,
            cache_write: result.was_cache_write,
            redirected_to: result.redirect_url.as_deref(),
            compressed: result.was_compressed,
            retries: result.retry_count,
            elapsed_ms: result.elapsed.map(|d| d.as_millis() as u64),
            error: result.error.as_ref().map(ToString::to_string),
        }
    }
}

impl RequestReport<'_> {
    pub fn line(&self) -> String {
        let status = self
            .status
            .map_or_else(|| "---".to_string(), |s| s.to_string());
        let cache = match (self.cache_hit, self.cache_fresh) {
            (true, true) => " [cached]",
            (true, false) => " [stale]",
            _ => "",
        };
        match &self.error {
            Some(error) => format!("{status} {} error: {error}", self.source),
            None => format!("{status} {} {} bytes{cache}", self.source, self.bytes),
        }
    }
}
