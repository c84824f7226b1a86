use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::ftp::FtpBackend;
use super::http::HttpBackend;
use super::error::TransportError;
use super::traits::TransportBackend;
use crate::config::HttpConfig;
use crate::dns::NameResolver;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no backend for scheme: {0}")]
    NotFound(String),
    #[error("backend disabled: {0}")]
    Disabled(String),
}

/// Registry mapping URI schemes to backend instances
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn TransportBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the backend's own scheme
    pub fn register(&mut self, backend: Arc<dyn TransportBackend>) {
        let scheme = backend.scheme();
        self.register_as(scheme, backend);
    }

    pub fn register_as(&mut self, scheme: impl Into<String>, backend: Arc<dyn TransportBackend>) {
        self.backends
            .insert(scheme.into().to_ascii_lowercase(), backend);
    }

    pub fn get(&self, scheme: &str) -> Result<Arc<dyn TransportBackend>, RegistryError> {
        let scheme = scheme.to_ascii_lowercase();
        let backend = self
            .backends
            .get(&scheme)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(scheme.clone()))?;
        if !backend.enabled() {
            return Err(RegistryError::Disabled(scheme));
        }
        Ok(backend)
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    /// Registry with the built-in http, https and ftp backends
    ///
    /// The HTTP clients look hosts up through `resolver`, which should be the
    /// one handed to the executor.
    pub fn with_defaults(
        http: &HttpConfig,
        resolver: Arc<dyn NameResolver>,
    ) -> Result<Self, TransportError> {
        let mut registry = Self::new();

        let http_backend = Arc::new(HttpBackend::new(http.clone(), resolver)?);
        registry.register(http_backend.clone());
        registry.register_as("https", http_backend);
        registry.register(Arc::new(FtpBackend::new()));

        Ok(registry)
    }
}
