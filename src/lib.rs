pub mod cache;
pub mod config;
pub mod dns;
pub mod executor;
pub mod humanize;
pub mod manager;
pub mod observability;
pub mod request;
pub mod storage;
pub mod transport;

pub use config::Config;
pub use manager::{BatchSummary, Manager};
pub use request::{FetchError, FetchResult, HttpMethod, Request};
