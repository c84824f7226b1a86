//! Artifact storage for files retrieved by directory-style backends
//! Uses Apache Arrow object_store crate

use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::{ObjectStore, PutPayload, path::Path as StoragePath};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid artifact name: {0}")]
    InvalidName(String),

    #[error("Output directory unavailable: {0}")]
    OutputDir(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata returned after a store
#[derive(Debug, Clone)]
pub struct ArtifactMetadata {
    pub name: String,
    pub etag: Option<String>,
    pub size: usize,
}

/// Destination for retrieved files
#[derive(Clone)]
pub struct ArtifactSink {
    store: Arc<dyn ObjectStore>,
}

impl ArtifactSink {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Files land directly under `dir`, which is created if missing
    pub fn local(dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let store = LocalFileSystem::new_with_prefix(dir.as_ref())?;
        Ok(Self::new(Arc::new(store)))
    }

    pub async fn put(&self, name: &str, data: Bytes) -> Result<ArtifactMetadata> {
        let path = artifact_path(name)?;
        let size = data.len();

        let put_result = self.store.put(&path, PutPayload::from(data)).await?;
        tracing::info!(name, size, "Stored artifact");

        Ok(ArtifactMetadata {
            name: name.to_string(),
            etag: put_result.e_tag,
            size,
        })
    }
}

/// Listed names are single path segments; anything else is refused
fn artifact_path(name: &str) -> Result<StoragePath> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    StoragePath::parse(name).map_err(|_| StorageError::InvalidName(name.to_string()))
}
