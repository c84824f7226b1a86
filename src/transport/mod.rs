//! Protocol backends
//!
//! A [`TransportBackend`] performs exactly one attempt against a source and
//! reports an [`Outcome`] or a [`TransportError`]. Backends are looked up by
//! URI scheme in a [`BackendRegistry`]; retries, caching and fallbacks live
//! in the executor.

mod decode;
mod error;
pub mod ftp;
pub mod http;
mod registry;
mod traits;

pub use decode::{ContentEncoding, check_body, decode_body};
pub use error::TransportError;
pub use ftp::FtpBackend;
pub use http::HttpBackend;
pub use registry::{BackendRegistry, RegistryError};
pub use traits::{FetchContext, Outcome, TransportBackend};
