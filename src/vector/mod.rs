//! Vector similarity and embedding generation.
//!
//! This module owns everything that deals with raw vectors: the validated
//! newtypes shared with the storage layer, cosine similarity and thresholded
//! ranking, and the [`Embedder`] implementations that turn exception reports
//! into vectors.

mod embedding;
mod local_model;
mod openai;
mod similarity;
mod types;

pub use embedding::{Embedder, HashingEmbedder, HashingOptions, create_exception_text};
pub use local_model::{DEFAULT_MODEL_NAME, FastEmbedEmbedder, FastEmbedOptions, parse_embedding_model};
pub use openai::{
    DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL, OpenAiEmbedder, OpenAiOptions, model_dimension,
};
pub use similarity::{cosine_similarity, normalize_in_place, rank_by_similarity};
pub use types::{Score, SimilarityThreshold, VECTOR_DIMENSION_384, VectorDimension, VectorError};

/// Similarity threshold used when none is configured.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.9;
