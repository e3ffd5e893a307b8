//! Type-safe wrappers and core types for vector similarity.
//!
//! Newtypes here keep raw `f32`/`usize` values from leaking across the
//! embedder/store boundary without validation.

use thiserror::Error;

/// Dimension of the all-MiniLM-L6-v2 family of sentence embeddings.
pub const VECTOR_DIMENSION_384: usize = 384;

/// Type-safe wrapper for vector dimensions.
///
/// Embedders and stores must agree on a dimension before any event is
/// processed; this type is what they compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Creates a standard 384-dimensional vector dimension.
    #[must_use]
    pub const fn dimension_384() -> Self {
        Self(VECTOR_DIMENSION_384)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for VectorDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cosine similarity score in the range [-1.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score(f32);

impl Score {
    /// Creates a new `Score` with validation.
    ///
    /// Returns an error if the score is NaN or outside [-1.0, 1.0]. A small
    /// tolerance absorbs floating-point error on identical vectors.
    pub fn new(value: f32) -> Result<Self, VectorError> {
        if value.is_nan() {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score cannot be NaN",
            });
        }
        if !(-1.0 - SCORE_TOLERANCE..=1.0 + SCORE_TOLERANCE).contains(&value) {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score must be in range [-1.0, 1.0]",
            });
        }
        Ok(Self(value.clamp(-1.0, 1.0)))
    }

    /// Score reported for a freshly created group.
    #[must_use]
    pub const fn one() -> Self {
        Self(1.0)
    }

    /// Returns the underlying f32 value.
    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

const SCORE_TOLERANCE: f32 = 1e-4;

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Minimum similarity an event needs to join an existing group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityThreshold(f32);

impl SimilarityThreshold {
    /// Creates a threshold, rejecting NaN and values outside [0.0, 1.0].
    pub fn new(value: f32) -> Result<Self, VectorError> {
        if value.is_nan() || !(0.0..=1.0).contains(&value) {
            return Err(VectorError::InvalidThreshold {
                value,
                reason: "Threshold must be in range [0.0, 1.0] and not NaN",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }

    /// Whether `score` is high enough to count as a match.
    #[must_use]
    pub fn admits(&self, score: Score) -> bool {
        score.get() >= self.0
    }
}

/// Errors that can occur during vector operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure the embedder and the store use the same vector size"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid score value: {value}\nReason: {reason}")]
    InvalidScore { value: f32, reason: &'static str },

    #[error("Invalid similarity threshold: {value}\nReason: {reason}")]
    InvalidThreshold { value: f32, reason: &'static str },

    #[error(
        "Embedding generation failed: {0}\nSuggestion: Verify the embedding model is properly initialized"
    )]
    EmbeddingFailed(String),

    #[error("Cannot embed an exception with an empty message")]
    EmptyMessage,

    #[error("Unknown embedding model '{0}'\nSuggestion: Use one of the model names listed in the settings template")]
    UnknownModel(String),
}
