//! Error types for the image store

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unsupported image format or an image that does not fit the pixel cap
    #[error("Format error: {0}")]
    Format(String),

    /// A request larger than the store accepts (threshold batch, name length)
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl StorageError {
    /// True for errors raised before any mutation was attempted
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            StorageError::Format(_) | StorageError::Capacity(_) | StorageError::InvalidArgument(_)
        )
    }
}
