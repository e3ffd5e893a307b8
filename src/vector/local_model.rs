//! Local sentence-embedding models run through fastembed.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};

use crate::types::ExceptionEvent;
use crate::vector::{Embedder, VectorDimension, VectorError, create_exception_text};

pub const DEFAULT_MODEL_NAME: &str = "AllMiniLML6V2";

/// Options for [`FastEmbedEmbedder`], decoded from `embedding.kwargs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastEmbedOptions {
    #[serde(default = "default_model_name")]
    pub model: String,
    /// Where downloaded model files are cached. Defaults to `~/.excgrouper/models`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub show_download_progress: bool,
}

fn default_model_name() -> String {
    DEFAULT_MODEL_NAME.to_string()
}

impl Default for FastEmbedOptions {
    fn default() -> Self {
        Self {
            model: default_model_name(),
            cache_dir: None,
            show_download_progress: false,
        }
    }
}

/// Resolves a model name from settings.
///
/// Accepts the fastembed variant name as well as the Hugging Face name of
/// the model (`all-MiniLM-L6-v2`, optionally prefixed with its organisation).
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    let short = name.rsplit('/').next().unwrap_or(name);
    match short {
        "AllMiniLML6V2" | "all-MiniLM-L6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" | "all-MiniLM-L12-v2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" | "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" | "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "MultilingualE5Small" | "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        "ParaphraseMLMiniLML12V2" | "paraphrase-multilingual-MiniLM-L12-v2" => {
            Ok(EmbeddingModel::ParaphraseMLMiniLML12V2)
        }
        _ => Err(VectorError::UnknownModel(name.to_string())),
    }
}

/// Embedder backed by a local ONNX sentence-embedding model.
///
/// The model is downloaded on first use into the cache directory. Inference
/// is CPU-bound, so `embed` runs it on tokio's blocking pool; the model sits
/// behind a mutex because fastembed needs `&mut` access.
pub struct FastEmbedEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: VectorDimension,
}

impl FastEmbedEmbedder {
    /// Loads the configured model and measures its output dimension.
    ///
    /// # Errors
    /// Returns an error if the model name is unknown or the model fails to
    /// initialize or download.
    pub fn new(options: &FastEmbedOptions) -> Result<Self, VectorError> {
        let model = parse_embedding_model(&options.model)?;
        let cache_dir = options
            .cache_dir
            .clone()
            .unwrap_or_else(crate::config::models_dir);

        tracing::info!(model = %options.model, cache_dir = %cache_dir.display(), "loading embedding model");

        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(options.show_download_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        // Dimension is not exposed by fastembed, so measure a sample embedding
        let sample = text_model
            .embed(vec!["dimension check"], None)
            .map_err(|e| VectorError::EmbeddingFailed(format!("Failed to measure model dimension: {e}")))?;
        let dimension = sample
            .first()
            .map(Vec::len)
            .ok_or_else(|| VectorError::EmbeddingFailed("Model returned no embedding".to_string()))?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_model)),
            model_name: options.model.clone(),
            dimension: VectorDimension::new(dimension)?,
        })
    }
}

impl std::fmt::Debug for FastEmbedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedEmbedder")
            .field("model", &self.model_name)
            .field("dimension", &self.dimension)
            .finish()
    }
}

#[async_trait]
impl Embedder for FastEmbedEmbedder {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    async fn embed(&self, event: &ExceptionEvent) -> Result<Vec<f32>, VectorError> {
        let text = create_exception_text(event)?;
        let model = Arc::clone(&self.model);

        let embeddings = tokio::task::spawn_blocking(move || {
            model
                .lock()
                .map_err(|_| {
                    VectorError::EmbeddingFailed(
                        "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                    )
                })?
                .embed(vec![text], None)
                .map_err(|e| VectorError::EmbeddingFailed(format!("Failed to generate embedding: {e}")))
        })
        .await
        .map_err(|e| VectorError::EmbeddingFailed(format!("Embedding task failed: {e}")))??;

        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| VectorError::EmbeddingFailed("Model returned no embedding".to_string()))?;
        self.dimension.validate_vector(&embedding)?;
        Ok(embedding)
    }
}
