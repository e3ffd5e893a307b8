//! Grouping engine that decides, per exception, whether it joins an existing
//! group or starts a new one.
//!
//! The engine holds no mutable state of its own: an embedder, a store and a
//! threshold. It is safe to share behind an `Arc` and call concurrently;
//! atomicity of counters is the store's job.

use std::sync::Arc;

use chrono::Duration;
use tracing::debug;

use crate::error::{EngineResult, GroupingError};
use crate::storage::VectorStore;
use crate::types::{ExceptionEvent, GroupMetadata, GroupingResult, TopException};
use crate::vector::{Embedder, SimilarityThreshold};

/// Orchestrates embed → search → match-or-create.
#[derive(Clone)]
pub struct GroupingEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    threshold: SimilarityThreshold,
}

impl GroupingEngine {
    /// Creates an engine after checking that the collaborators agree.
    ///
    /// # Errors
    /// [`GroupingError::Configuration`] if `threshold` is outside [0, 1] or
    /// the embedder and store dimensions differ.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        threshold: f32,
    ) -> EngineResult<Self> {
        let threshold = SimilarityThreshold::new(threshold)
            .map_err(|e| GroupingError::configuration(e.to_string()))?;

        if embedder.dimension() != store.dimension() {
            return Err(GroupingError::configuration(format!(
                "Embedder '{}' produces {}-dimensional vectors but the {} store expects {}",
                embedder.name(),
                embedder.dimension(),
                store.backend(),
                store.dimension()
            )));
        }

        Ok(Self {
            embedder,
            store,
            threshold,
        })
    }

    pub fn threshold(&self) -> SimilarityThreshold {
        self.threshold
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Assigns `event` to a group.
    ///
    /// The best match at or above the threshold wins and has its count
    /// incremented; the remaining matches are reported as similar groups.
    /// Without a match a new group is created with confidence 1.0.
    /// Errors from either collaborator are returned unchanged in kind and
    /// leave no partial state: embedding happens before any write.
    pub async fn process(&self, event: &ExceptionEvent) -> EngineResult<GroupingResult> {
        let vector = self.embedder.embed(event).await?;
        // A misbehaving embedder must not reach the store
        self.embedder.dimension().validate_vector(&vector)?;

        let matches = self.store.find_similar(&vector, self.threshold).await?;
        let mut ranked = matches.into_iter();

        match ranked.next() {
            Some((group_id, score)) => {
                self.store
                    .increment_occurrence(&group_id, event.timestamp())
                    .await?;
                let similar_group_ids: Vec<_> = ranked.map(|(id, _)| id).collect();

                debug!(
                    %group_id,
                    score = score.get(),
                    similar = similar_group_ids.len(),
                    exception_type = event.exception_type(),
                    "matched existing group"
                );

                Ok(GroupingResult {
                    group_id,
                    confidence: score.get(),
                    similar_group_ids,
                    is_new_group: false,
                })
            }
            None => {
                let group_id = self
                    .store
                    .store_vector(vector, GroupMetadata::from_event(event))
                    .await?;

                debug!(
                    %group_id,
                    exception_type = event.exception_type(),
                    "created new group"
                );

                Ok(GroupingResult {
                    group_id,
                    confidence: 1.0,
                    similar_group_ids: Vec::new(),
                    is_new_group: true,
                })
            }
        }
    }

    /// Most frequent groups seen within `window` of now.
    pub async fn top_exceptions(
        &self,
        limit: usize,
        window: Duration,
    ) -> EngineResult<Vec<TopException>> {
        Ok(self.store.get_top_exceptions(limit, window).await?)
    }
}

impl std::fmt::Debug for GroupingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupingEngine")
            .field("embedder", &self.embedder.name())
            .field("store", &self.store.backend())
            .field("threshold", &self.threshold.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryVectorStore;
    use crate::types::GroupId;
    use crate::vector::{HashingEmbedder, VectorDimension, VectorError};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Returns a fixed vector per message.
    struct StaticEmbedder {
        dimension: VectorDimension,
        vectors: HashMap<String, Vec<f32>>,
    }

    impl StaticEmbedder {
        fn new(dimension: usize, vectors: &[(&str, Vec<f32>)]) -> Self {
            Self {
                dimension: VectorDimension::new(dimension).unwrap(),
                vectors: vectors
                    .iter()
                    .map(|(message, vector)| (message.to_string(), vector.clone()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl Embedder for StaticEmbedder {
        fn name(&self) -> &str {
            "static"
        }

        fn dimension(&self) -> VectorDimension {
            self.dimension
        }

        async fn embed(&self, event: &ExceptionEvent) -> Result<Vec<f32>, VectorError> {
            self.vectors
                .get(event.message())
                .cloned()
                .ok_or_else(|| VectorError::EmbeddingFailed(format!("no vector for {}", event.message())))
        }
    }

    fn engine_with(embedder: StaticEmbedder, threshold: f32) -> (GroupingEngine, Arc<MemoryVectorStore>) {
        let store = Arc::new(MemoryVectorStore::new(embedder.dimension));
        let engine = GroupingEngine::new(Arc::new(embedder), store.clone(), threshold).unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn test_similar_events_share_a_group() {
        let embedder = StaticEmbedder::new(
            2,
            &[("a", vec![1.0, 0.0]), ("a'", vec![0.99, 0.05])],
        );
        let (engine, store) = engine_with(embedder, 0.9);

        let first = engine.process(&ExceptionEvent::new("a")).await.unwrap();
        assert!(first.is_new_group);
        assert_eq!(first.confidence, 1.0);
        assert!(first.similar_group_ids.is_empty());

        let second = engine.process(&ExceptionEvent::new("a'")).await.unwrap();
        assert!(!second.is_new_group);
        assert_eq!(second.group_id, first.group_id);
        assert!(second.confidence >= 0.9 && second.confidence < 1.0);

        let group = store.get_group(&first.group_id).await.unwrap().unwrap();
        assert_eq!(group.count, 2);
    }

    #[tokio::test]
    async fn test_dissimilar_event_creates_group() {
        let embedder = StaticEmbedder::new(2, &[("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])]);
        let (engine, store) = engine_with(embedder, 0.9);

        let a = engine.process(&ExceptionEvent::new("a")).await.unwrap();
        let b = engine.process(&ExceptionEvent::new("b")).await.unwrap();

        assert!(b.is_new_group);
        assert_ne!(a.group_id, b.group_id);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get_group(&b.group_id).await.unwrap().unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_runner_up_matches_are_reported() {
        let embedder = StaticEmbedder::new(
            2,
            &[
                ("x", vec![1.0, 0.0]),
                ("y", vec![0.0, 1.0]),
                ("between", vec![0.8, 0.6]),
            ],
        );
        let (engine, store) = engine_with(embedder, 0.5);

        let x = engine.process(&ExceptionEvent::new("x")).await.unwrap();
        // "y" scores 0.0 against "x", so it opens its own group
        let y = engine.process(&ExceptionEvent::new("y")).await.unwrap();
        assert!(y.is_new_group);

        // 0.8 against x, 0.6 against y
        let result = engine.process(&ExceptionEvent::new("between")).await.unwrap();
        assert_eq!(result.group_id, x.group_id);
        assert!((result.confidence - 0.8).abs() < 1e-5);
        assert_eq!(result.similar_group_ids, vec![y.group_id.clone()]);

        assert_eq!(store.get_group(&x.group_id).await.unwrap().unwrap().count, 2);
        assert_eq!(store.get_group(&y.group_id).await.unwrap().unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_match_records_event_metadata_once() {
        let embedder = StaticEmbedder::new(2, &[("first", vec![1.0, 0.0]), ("second", vec![1.0, 0.0])]);
        let (engine, store) = engine_with(embedder, 0.9);

        let event = ExceptionEvent::new("first").with_type("KeyError");
        let created = engine.process(&event).await.unwrap();
        let later = ExceptionEvent::new("second")
            .with_type("KeyError")
            .with_timestamp(event.timestamp() + Duration::seconds(30));
        engine.process(&later).await.unwrap();

        let group = store.get_group(&created.group_id).await.unwrap().unwrap();
        assert_eq!(group.metadata.example_message, "first");
        assert_eq!(group.metadata.first_seen, event.timestamp());
        assert_eq!(group.last_seen, later.timestamp());
    }

    #[tokio::test]
    async fn test_embedding_failure_writes_nothing() {
        let embedder = StaticEmbedder::new(2, &[]);
        let (engine, store) = engine_with(embedder, 0.9);

        let err = engine.process(&ExceptionEvent::new("unknown")).await.unwrap_err();
        assert_eq!(err.status_code(), "EMBEDDING_ERROR");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_length_embedding_is_embedding_error() {
        let embedder = StaticEmbedder::new(3, &[("short", vec![1.0, 0.0])]);
        let (engine, store) = engine_with(embedder, 0.9);

        let err = engine.process(&ExceptionEvent::new("short")).await.unwrap_err();
        assert!(matches!(err, GroupingError::Embedding(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalid_threshold_fails_fast() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
        let store: Arc<dyn VectorStore> =
            Arc::new(MemoryVectorStore::new(VectorDimension::dimension_384()));

        for threshold in [-0.1, 1.5, f32::NAN] {
            let err = GroupingEngine::new(embedder.clone(), store.clone(), threshold).unwrap_err();
            assert_eq!(err.status_code(), "CONFIGURATION_ERROR");
        }
    }

    #[test]
    fn test_dimension_mismatch_fails_fast() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
        let store: Arc<dyn VectorStore> =
            Arc::new(MemoryVectorStore::new(VectorDimension::new(1536).unwrap()));

        let err = GroupingEngine::new(embedder, store, 0.9).unwrap_err();
        assert!(matches!(err, GroupingError::Configuration { .. }));
        assert!(err.to_string().contains("1536"));
    }

    #[tokio::test]
    async fn test_top_exceptions_delegates() {
        let embedder = StaticEmbedder::new(2, &[("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])]);
        let (engine, _store) = engine_with(embedder, 0.9);

        for _ in 0..3 {
            engine.process(&ExceptionEvent::new("a")).await.unwrap();
        }
        engine.process(&ExceptionEvent::new("b")).await.unwrap();

        let top = engine.top_exceptions(10, Duration::days(1)).await.unwrap();
        let counts: Vec<u64> = top.iter().map(|t| t.count).collect();
        assert_eq!(counts, vec![3, 1]);

        assert!(engine.top_exceptions(0, Duration::days(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vanished_group_is_not_found() {
        /// Reports a match that the store no longer holds.
        struct StaleStore(MemoryVectorStore);

        #[async_trait]
        impl VectorStore for StaleStore {
            fn backend(&self) -> &'static str {
                "stale"
            }
            fn dimension(&self) -> VectorDimension {
                self.0.dimension()
            }
            async fn store_vector(
                &self,
                vector: Vec<f32>,
                metadata: GroupMetadata,
            ) -> crate::storage::StoreResult<GroupId> {
                self.0.store_vector(vector, metadata).await
            }
            async fn find_similar(
                &self,
                _vector: &[f32],
                _threshold: SimilarityThreshold,
            ) -> crate::storage::StoreResult<Vec<(GroupId, crate::vector::Score)>> {
                Ok(vec![(GroupId::new("gone"), crate::vector::Score::one())])
            }
            async fn increment_occurrence(
                &self,
                group_id: &GroupId,
                timestamp: chrono::DateTime<chrono::Utc>,
            ) -> crate::storage::StoreResult<()> {
                self.0.increment_occurrence(group_id, timestamp).await
            }
            async fn get_top_exceptions(
                &self,
                limit: usize,
                window: Duration,
            ) -> crate::storage::StoreResult<Vec<TopException>> {
                self.0.get_top_exceptions(limit, window).await
            }
            async fn get_group(
                &self,
                group_id: &GroupId,
            ) -> crate::storage::StoreResult<Option<crate::types::ExceptionGroup>> {
                self.0.get_group(group_id).await
            }
            async fn group_count(&self) -> crate::storage::StoreResult<usize> {
                self.0.group_count().await
            }
        }

        let embedder = StaticEmbedder::new(2, &[("a", vec![1.0, 0.0])]);
        let store = Arc::new(StaleStore(MemoryVectorStore::new(embedder.dimension)));
        let engine = GroupingEngine::new(Arc::new(embedder), store.clone(), 0.9).unwrap();

        let err = engine.process(&ExceptionEvent::new("a")).await.unwrap_err();
        assert!(matches!(err, GroupingError::NotFound { ref group_id } if group_id.as_str() == "gone"));
        // No replacement group is created
        assert_eq!(store.group_count().await.unwrap(), 0);
    }
}
