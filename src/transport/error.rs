use std::time::Duration;
use thiserror::Error;

use crate::dns::ResolveError;
use crate::storage::StorageError;

/// Failure of a single fetch attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("could not resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("redirect limit of {limit} exceeded")]
    RedirectLimitExceeded { limit: usize },

    #[error("server answered with status {status}")]
    Status { status: u16 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("could not decode body: {0}")]
    Decode(String),

    #[error("response failed validation: {0}")]
    ValidationFailure(String),

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("artifact storage failed: {0}")]
    Storage(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether another attempt could change the outcome
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidSource(_))
    }
}

impl From<ResolveError> for TransportError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Lookup { host, reason } => Self::Resolution { host, reason },
            ResolveError::NoAddresses(host) => Self::Resolution {
                host,
                reason: "no addresses returned".to_string(),
            },
        }
    }
}

impl From<StorageError> for TransportError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Connect(err.to_string())
    }
}
