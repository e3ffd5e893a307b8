//! Error types for exception grouping
//!
//! This module provides the top-level error returned by the engine, the
//! grouper facade and the service layer. Layer-specific errors
//! ([`VectorError`], [`StoreError`]) convert into it.

use thiserror::Error;

use crate::storage::StoreError;
use crate::types::GroupId;
use crate::vector::VectorError;

/// Main error type for grouping operations
#[derive(Error, Debug)]
pub enum GroupingError {
    #[error("Failed to embed exception: {0}")]
    Embedding(String),

    #[error("{backend} store is unavailable: {reason}")]
    StoreUnavailable {
        backend: &'static str,
        reason: String,
    },

    #[error("Exception group '{group_id}' not found. It may have been removed from the store.")]
    NotFound { group_id: GroupId },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("Grouping service returned {status} ({code}): {detail}")]
    Remote {
        status: u16,
        code: String,
        detail: String,
    },
}

impl GroupingError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Get a status code for this error, used in HTTP bodies and JSON output
    pub fn status_code(&self) -> String {
        match self {
            Self::Embedding(_) => "EMBEDDING_ERROR",
            Self::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Remote { .. } => "REMOTE_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Embedding(_) => vec![
                "Check that the exception message is not empty",
                "If using a downloaded model, make sure the first download completed",
            ],
            Self::StoreUnavailable { .. } => vec![
                "Check that the vector store or grouping service is running and reachable",
                "Retry the operation, nothing was recorded",
            ],
            Self::NotFound { .. } => vec![
                "The store may have been cleaned up while the group was in use",
                "Process the exception again to create a fresh group",
            ],
            Self::Configuration { .. } => vec![
                "Run 'excgrouper config' to see the effective settings",
                "Use a fresh storage path when switching embedding models",
            ],
            Self::Storage(_) => vec![
                "Check disk space and permissions in the storage directory",
                "Run 'excgrouper cleanup' to start over with an empty store",
            ],
            Self::Remote { .. } => vec!["Check the grouping service logs for details"],
        }
    }
}

impl From<StoreError> for GroupingError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(group_id) => Self::NotFound { group_id },
            StoreError::Unavailable { backend, reason } => {
                Self::StoreUnavailable { backend, reason }
            }
            StoreError::DimensionMismatch { .. } => Self::Configuration {
                reason: error.to_string(),
            },
            other => Self::Storage(other),
        }
    }
}

impl From<VectorError> for GroupingError {
    fn from(error: VectorError) -> Self {
        match error {
            VectorError::EmbeddingFailed(_)
            | VectorError::EmptyMessage
            | VectorError::DimensionMismatch { .. } => Self::Embedding(error.to_string()),
            VectorError::InvalidDimension { .. }
            | VectorError::InvalidScore { .. }
            | VectorError::InvalidThreshold { .. }
            | VectorError::UnknownModel(_) => Self::Configuration {
                reason: error.to_string(),
            },
        }
    }
}

pub type EngineResult<T> = Result<T, GroupingError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    /// Wrap the error as a configuration problem
    fn context(self, msg: &str) -> Result<T, GroupingError>;

    /// Wrap the error as a configuration problem with the offending path
    fn with_path(self, path: &std::path::Path) -> Result<T, GroupingError>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: &str) -> Result<T, GroupingError> {
        self.map_err(|e| GroupingError::configuration(format!("{msg}: {e}")))
    }

    fn with_path(self, path: &std::path::Path) -> Result<T, GroupingError> {
        self.map_err(|e| {
            GroupingError::configuration(format!("Error processing '{}': {}", path.display(), e))
        })
    }
}
