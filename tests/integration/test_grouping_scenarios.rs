//! End-to-end grouping scenarios against the public API.

use std::sync::Arc;

use chrono::{Duration, Utc};
use excgrouper::storage::MemoryVectorStore;
use excgrouper::vector::{SimilarityThreshold, VectorDimension};
use excgrouper::{
    Embedder, ExceptionEvent, GroupId, GroupMetadata, GroupingEngine, GroupingError, StoreError,
    VectorError, VectorStore,
};

use crate::common::{event, group_count, memory_engine, vector_with_cosine};

fn metadata(message: &str) -> GroupMetadata {
    GroupMetadata::from_event(&event("TestError", message))
}

#[tokio::test]
async fn test_find_similar_returns_only_vectors_above_threshold() {
    let store = MemoryVectorStore::new(VectorDimension::new(4).unwrap());

    let id1 = store
        .store_vector(vector_with_cosine(4, 1, 1.0), metadata("v1"))
        .await
        .unwrap();
    let id2 = store
        .store_vector(vector_with_cosine(4, 1, 0.97), metadata("v2"))
        .await
        .unwrap();
    store
        .store_vector(vector_with_cosine(4, 2, 0.93), metadata("v3"))
        .await
        .unwrap();
    store
        .store_vector(vector_with_cosine(4, 3, 0.89), metadata("v4"))
        .await
        .unwrap();

    let query = vector_with_cosine(4, 1, 1.0);
    let matches = store
        .find_similar(&query, SimilarityThreshold::new(0.95).unwrap())
        .await
        .unwrap();

    let ids: Vec<&GroupId> = matches.iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec![&id1, &id2]);
    assert!(matches[0].1 >= matches[1].1);
    assert!((matches[1].1.get() - 0.97).abs() < 1e-4);
}

#[tokio::test]
async fn test_messages_differing_in_identifiers_share_a_group() {
    let engine = memory_engine();

    let first = engine
        .process(&event("ConnectionError", "Connection refused to database xyz123"))
        .await
        .unwrap();
    let second = engine
        .process(&event("ConnectionError", "Connection refused to database abc987"))
        .await
        .unwrap();

    assert!(first.is_new_group);
    assert!(!second.is_new_group);
    assert_eq!(first.group_id, second.group_id);

    let group = engine
        .store()
        .get_group(&first.group_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(group.count, 2);
    assert_eq!(group.metadata.example_message, "Connection refused to database xyz123");
}

#[tokio::test]
async fn test_top_exceptions_orders_by_frequency() {
    let engine = memory_engine();
    let cases = [
        ("KeyError", "Missing key 'user_id' in session", 5),
        ("ZeroDivisionError", "Division by zero in invoice total", 3),
        ("PermissionError", "Permission denied writing report file", 1),
    ];

    for (exception_type, message, times) in cases {
        for _ in 0..times {
            engine.process(&event(exception_type, message)).await.unwrap();
        }
    }

    let top = engine.top_exceptions(3, Duration::days(1)).await.unwrap();
    let counts: Vec<u64> = top.iter().map(|t| t.count).collect();
    assert_eq!(counts, vec![5, 3, 1]);
    assert_eq!(top[0].metadata.exception_type, "KeyError");
    assert_eq!(top[2].metadata.exception_type, "PermissionError");
}

#[tokio::test]
async fn test_increment_of_unknown_group_fails_without_side_effects() {
    let engine = memory_engine();
    let known = engine
        .process(&event("ValueError", "invalid literal for int"))
        .await
        .unwrap();
    let before = group_count(engine.store().as_ref()).await;

    let unknown = GroupId::generate();
    let err = engine
        .store()
        .increment_occurrence(&unknown, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(ref id) if *id == unknown));

    let err: GroupingError = err.into();
    assert_eq!(err.status_code(), "NOT_FOUND");

    assert_eq!(group_count(engine.store().as_ref()).await, before);
    let group = engine
        .store()
        .get_group(&known.group_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(group.count, 1);
    assert!(engine.store().get_group(&unknown).await.unwrap().is_none());
}

/// Embeds every event to the same fixed vector.
struct FixedEmbedder(Vec<f32>);

#[async_trait::async_trait]
impl Embedder for FixedEmbedder {
    fn name(&self) -> &str {
        "fixed"
    }

    fn dimension(&self) -> VectorDimension {
        VectorDimension::new(self.0.len()).unwrap()
    }

    async fn embed(&self, _event: &ExceptionEvent) -> Result<Vec<f32>, VectorError> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn test_runner_up_groups_are_reported() {
    let store = Arc::new(MemoryVectorStore::new(VectorDimension::new(4).unwrap()));
    let best = store
        .store_vector(vector_with_cosine(4, 1, 1.0), metadata("best"))
        .await
        .unwrap();
    let runner_up = store
        .store_vector(vector_with_cosine(4, 2, 0.96), metadata("runner-up"))
        .await
        .unwrap();

    let embedder = Arc::new(FixedEmbedder(vector_with_cosine(4, 1, 1.0)));
    let engine = GroupingEngine::new(embedder, store.clone(), 0.95).unwrap();
    let result = engine.process(&event("TestError", "anything")).await.unwrap();

    assert_eq!(result.group_id, best);
    assert!(!result.is_new_group);
    assert!((result.confidence - 1.0).abs() < 1e-6);
    assert_eq!(result.similar_group_ids, vec![runner_up.clone()]);

    let runner_up_group = store.get_group(&runner_up).await.unwrap().unwrap();
    assert_eq!(runner_up_group.count, 1);
}
