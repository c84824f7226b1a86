//! Request model
//!
//! A [`Request`] carries its source URI, per-request options and, once a
//! batch has run, the [`FetchResult`] describing what happened. Options the
//! caller leaves unset are filled from configuration by
//! [`RequestSettings::resolve`] at dispatch time.

mod error;
mod settings;
mod types;

pub use error::FetchError;
pub use settings::{RequestSettings, effective};
pub use types::{FetchResult, HttpMethod, Request, Timings};
