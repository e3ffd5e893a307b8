use thiserror::Error;

use crate::types::GroupId;
use crate::vector::VectorError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(
        "{backend} store is unavailable: {reason}\nSuggestion: Check that the store is running and reachable, then retry"
    )]
    Unavailable {
        backend: &'static str,
        reason: String,
    },

    #[error("Exception group not found: {0}")]
    NotFound(GroupId),

    #[error(
        "Store holds {stored}-dimensional vectors but the embedder produces {requested}\nSuggestion: Use a fresh storage path or collection, or switch back to the previous embedding model"
    )]
    DimensionMismatch { stored: usize, requested: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid storage format: {0}")]
    InvalidFormat(String),

    #[error("Storage version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected response from {backend}: {detail}")]
    UnexpectedResponse {
        backend: &'static str,
        detail: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;
