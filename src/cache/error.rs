use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Record decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Corrupt cache record: {0}")]
    Corrupt(String),

    #[error("Entry of {size} bytes exceeds limit of {limit} bytes")]
    EntryTooLarge { size: usize, limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
