use thiserror::Error;

use crate::transport::{RegistryError, TransportError};

/// Terminal error recorded on a request's result
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("no backend registered for scheme '{0}'")]
    UnknownScheme(String),

    #[error("backend for scheme '{0}' is disabled")]
    BackendDisabled(String),

    #[error("worker aborted: {0}")]
    WorkerAborted(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(err) if err.is_timeout())
    }
}

impl From<RegistryError> for FetchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(scheme) => Self::UnknownScheme(scheme),
            RegistryError::Disabled(scheme) => Self::BackendDisabled(scheme),
        }
    }
}
