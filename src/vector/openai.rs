//! Remote embeddings through an OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::ExceptionEvent;
use crate::vector::{Embedder, VectorDimension, VectorError, create_exception_text};

pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Options for [`OpenAiEmbedder`], decoded from `embedding.kwargs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiOptions {
    #[serde(default = "default_model")]
    pub model: String,
    /// Falls back to the `OPENAI_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Requested output size, for models that support shortening.
    #[serde(default)]
    pub dimensions: Option<usize>,
}

fn default_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.to_string()
}

impl Default for OpenAiOptions {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            base_url: default_base_url(),
            dimensions: None,
        }
    }
}

/// Native output size of the known OpenAI embedding models.
pub fn model_dimension(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        _ => 1536,
    }
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    requested_dimensions: Option<usize>,
    dimension: VectorDimension,
}

impl OpenAiEmbedder {
    /// # Errors
    /// Fails when no API key is configured or the requested dimension is zero.
    pub fn new(options: &OpenAiOptions) -> Result<Self, VectorError> {
        let api_key = options
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                VectorError::EmbeddingFailed(format!(
                    "No OpenAI API key configured. Set embedding.kwargs.api_key or {API_KEY_ENV}"
                ))
            })?;

        let dimension = VectorDimension::new(
            options
                .dimensions
                .unwrap_or_else(|| model_dimension(&options.model)),
        )?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            model: options.model.clone(),
            requested_dimensions: options.dimensions,
            dimension,
        })
    }
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    async fn embed(&self, event: &ExceptionEvent) -> Result<Vec<f32>, VectorError> {
        let text = create_exception_text(event)?;

        let mut body = serde_json::json!({
            "input": text,
            "model": self.model,
        });
        if let Some(dims) = self.requested_dimensions {
            body["dimensions"] = serde_json::json!(dims);
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::EmbeddingFailed(format!("Embedding request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(VectorError::EmbeddingFailed(
                "Embedding API rate limit exceeded".to_string(),
            ));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(VectorError::EmbeddingFailed(format!(
                "API error {status}: {error_text}"
            )));
        }

        let result: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| VectorError::EmbeddingFailed(format!("Invalid API response: {e}")))?;

        let embedding = result
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| VectorError::EmbeddingFailed("No embedding in response".to_string()))?;

        self.dimension.validate_vector(&embedding)?;
        tracing::debug!(model = %self.model, dimension = embedding.len(), "generated remote embedding");
        Ok(embedding)
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
