//! Entry point that turns [`Settings`] into a working grouper.
//!
//! Local modes run a [`GroupingEngine`] in process against the embedded
//! store or a Qdrant server. Cloud mode forwards every call to a remote
//! grouping service and never loads an embedding model.

use std::sync::Arc;

use chrono::Duration;
use tracing::info;

use crate::client::ServiceClient;
use crate::config::{EmbedderKind, EmbeddingConfig, Settings, StorageBackend};
use crate::engine::GroupingEngine;
use crate::error::{EngineResult, GroupingError};
use crate::storage::{LocalVectorStore, QdrantOptions, QdrantVectorStore, VectorStore};
use crate::types::{ExceptionEvent, GroupId, GroupingResult, TopException};
use crate::vector::{
    Embedder, FastEmbedEmbedder, FastEmbedOptions, HashingEmbedder, HashingOptions,
    OpenAiEmbedder, OpenAiOptions,
};

#[derive(Debug, Clone)]
pub enum Grouper {
    Local(GroupingEngine),
    Cloud(ServiceClient),
}

impl Grouper {
    /// Builds the grouper described by `settings`.
    ///
    /// May download the embedding model on first use.
    pub async fn from_settings(settings: &Settings) -> EngineResult<Self> {
        settings.validate()?;
        let storage = &settings.storage;

        let (embedder, store): (Arc<dyn Embedder>, Arc<dyn VectorStore>) = match storage.backend()
        {
            StorageBackend::Cloud { url, api_key } => {
                info!(url = %url, "using remote grouping service");
                return Ok(Self::Cloud(ServiceClient::new(url, api_key)));
            }
            StorageBackend::Qdrant { url, api_key } => {
                let embedder = build_embedder(&settings.embedding).await?;
                let options = QdrantOptions {
                    url: url.clone(),
                    api_key,
                    collection: storage.collection.clone(),
                    max_matches: storage.max_matches,
                };
                let store = QdrantVectorStore::connect(options, embedder.dimension()).await?;
                info!(url = %url, collection = %storage.collection, "using qdrant store");
                (embedder, Arc::new(store))
            }
            StorageBackend::Local { path } => {
                let embedder = build_embedder(&settings.embedding).await?;
                let store =
                    LocalVectorStore::open_collection(&path, &storage.collection, embedder.dimension())?
                        .with_max_matches(storage.max_matches);
                info!(
                    path = %path.display(),
                    collection = %storage.collection,
                    groups = store.len(),
                    "using local store"
                );
                (embedder, Arc::new(store))
            }
        };

        let engine = GroupingEngine::new(embedder, store, settings.embedding.similarity_threshold)?;
        Ok(Self::Local(engine))
    }

    /// Groups one exception and returns the id of its group.
    pub async fn group_exception(&self, event: &ExceptionEvent) -> EngineResult<GroupId> {
        match self {
            Self::Local(engine) => Ok(engine.process(event).await?.group_id),
            Self::Cloud(client) => client.process(event).await,
        }
    }

    /// Full match-or-create outcome. Only available in local modes.
    pub async fn process(&self, event: &ExceptionEvent) -> EngineResult<GroupingResult> {
        match self {
            Self::Local(engine) => engine.process(event).await,
            Self::Cloud(_) => Err(GroupingError::configuration(
                "Detailed grouping results are not available from a remote service",
            )),
        }
    }

    /// Most frequent groups of the last `days` days.
    pub async fn top_exceptions(&self, limit: usize, days: u32) -> EngineResult<Vec<TopException>> {
        match self {
            Self::Local(engine) => {
                engine
                    .top_exceptions(limit, Duration::days(i64::from(days)))
                    .await
            }
            Self::Cloud(client) => client.top_exceptions(limit, days).await,
        }
    }

    pub fn is_cloud(&self) -> bool {
        matches!(self, Self::Cloud(_))
    }
}

/// Instantiates the embedder named by `embedding.class` with its kwargs.
pub async fn build_embedder(config: &EmbeddingConfig) -> EngineResult<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.class {
        EmbedderKind::Fastembed => {
            let options: FastEmbedOptions = config.options()?;
            // Model loading reads (and may download) files
            let embedder = tokio::task::spawn_blocking(move || FastEmbedEmbedder::new(&options))
                .await
                .map_err(|e| GroupingError::Embedding(format!("Model loading task failed: {e}")))??;
            Arc::new(embedder)
        }
        EmbedderKind::Openai => {
            let options: OpenAiOptions = config.options()?;
            Arc::new(OpenAiEmbedder::new(&options)?)
        }
        EmbedderKind::Hashing => {
            let options: HashingOptions = config.options()?;
            Arc::new(HashingEmbedder::from_options(&options)?)
        }
    };

    info!(
        embedder = embedder.name(),
        dimension = embedder.dimension().get(),
        "embedder ready"
    );
    Ok(embedder)
}
