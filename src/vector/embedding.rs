//! Embedding generation for exception reports.
//!
//! An [`Embedder`] turns an [`ExceptionEvent`] into a fixed-length vector.
//! Three implementations ship with the crate:
//!
//! - [`FastEmbedEmbedder`](crate::vector::FastEmbedEmbedder): local sentence
//!   embedding model run through fastembed.
//! - [`OpenAiEmbedder`](crate::vector::OpenAiEmbedder): remote
//!   OpenAI-compatible `/embeddings` endpoint.
//! - [`HashingEmbedder`]: deterministic feature hashing, no model download.
//!
//! All of them embed the same text, built by [`create_exception_text`], so
//! switching backends changes the vector space but not what is embedded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::ExceptionEvent;
use crate::vector::{VECTOR_DIMENSION_384, VectorDimension, VectorError, normalize_in_place};

/// Placeholder that replaces tokens containing digits (ids, ports, hashes).
const VARIABLE_TOKEN: &str = "<var>";

/// Trait for turning exception reports into vectors.
///
/// Implementations must be thread-safe; the grouping engine calls `embed`
/// from concurrent requests without additional locking.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Short identifier used in logs and settings output.
    fn name(&self) -> &str;

    /// Dimension of every vector this embedder produces.
    fn dimension(&self) -> VectorDimension;

    /// Embeds a single exception report.
    ///
    /// # Errors
    /// Returns [`VectorError::EmptyMessage`] for blank messages and
    /// [`VectorError::EmbeddingFailed`] when the backend cannot produce a
    /// vector.
    async fn embed(&self, event: &ExceptionEvent) -> Result<Vec<f32>, VectorError>;
}

/// Builds the text that gets embedded for an event.
///
/// # Example
/// ```ignore
/// let event = ExceptionEvent::new("Division by zero").with_type("ZeroDivisionError");
/// assert_eq!(create_exception_text(&event)?, "ZeroDivisionError: Division by zero");
/// ```
pub fn create_exception_text(event: &ExceptionEvent) -> Result<String, VectorError> {
    let message = event.message().trim();
    if message.is_empty() {
        return Err(VectorError::EmptyMessage);
    }
    Ok(format!("{}: {message}", event.exception_type()))
}

/// Options for [`HashingEmbedder`], decoded from `embedding.kwargs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingOptions {
    #[serde(default = "default_hashing_dimension")]
    pub dimension: usize,
}

fn default_hashing_dimension() -> usize {
    VECTOR_DIMENSION_384
}

impl Default for HashingOptions {
    fn default() -> Self {
        Self {
            dimension: default_hashing_dimension(),
        }
    }
}

/// Deterministic bag-of-words embedder using signed feature hashing.
///
/// Each lower-cased word token is hashed with SHA-256 into one bucket with a
/// +1/-1 sign, and the result is L2-normalised. Tokens that contain digits
/// are collapsed into a single placeholder so that messages differing only in
/// identifiers ("database xyz123" vs "database abc987") embed identically.
///
/// Vectors are stable across runs and platforms, which makes this embedder
/// safe to use with a persistent store.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: VectorDimension,
}

impl HashingEmbedder {
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    pub fn from_options(options: &HashingOptions) -> Result<Self, VectorError> {
        Ok(Self::new(VectorDimension::new(options.dimension)?))
    }

    /// Embeds raw text without the event wrapper.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.get();
        let mut vector = vec![0.0; dim];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % dim as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        normalize_in_place(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(VectorDimension::dimension_384())
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    async fn embed(&self, event: &ExceptionEvent) -> Result<Vec<f32>, VectorError> {
        let text = create_exception_text(event)?;
        Ok(self.embed_text(&text))
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .map(|token| {
            if token.chars().any(|c| c.is_ascii_digit()) {
                VARIABLE_TOKEN.to_string()
            } else {
                token.to_lowercase()
            }
        })
}
