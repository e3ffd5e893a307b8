#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use excgrouper::storage::MemoryVectorStore;
use excgrouper::vector::VectorDimension;
use excgrouper::{
    ExceptionEvent, GroupingEngine, HashingEmbedder, LocalVectorStore, Settings, VectorStore,
};
use tempfile::TempDir;

pub const TEST_THRESHOLD: f32 = 0.9;

/// Engine over the hashing embedder and a fresh in-memory store.
pub fn memory_engine() -> GroupingEngine {
    let embedder = HashingEmbedder::default();
    let store = MemoryVectorStore::new(embedder_dimension(&embedder));
    GroupingEngine::new(Arc::new(embedder), Arc::new(store), TEST_THRESHOLD)
        .expect("Failed to build engine")
}

/// Engine over the hashing embedder and an on-disk store under `dir`.
pub fn local_engine(dir: &TempDir) -> GroupingEngine {
    let embedder = HashingEmbedder::default();
    let store = LocalVectorStore::open(dir.path(), embedder_dimension(&embedder))
        .expect("Failed to open local store");
    GroupingEngine::new(Arc::new(embedder), Arc::new(store), TEST_THRESHOLD)
        .expect("Failed to build engine")
}

fn embedder_dimension(embedder: &HashingEmbedder) -> VectorDimension {
    excgrouper::Embedder::dimension(embedder)
}

/// Settings selecting the hashing embedder and an embedded store in `dir`.
pub fn hashing_settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.embedding.class = excgrouper::EmbedderKind::Hashing;
    settings.storage.local_path = Some(dir.path().join("storage"));
    settings
}

pub fn event(exception_type: &str, message: &str) -> ExceptionEvent {
    ExceptionEvent::new(message).with_type(exception_type)
}

pub fn event_at(exception_type: &str, message: &str, at: DateTime<Utc>) -> ExceptionEvent {
    event(exception_type, message).with_timestamp(at)
}

/// Unit vector whose cosine with the first axis is `cos`, rotated into `axis`.
pub fn vector_with_cosine(dimension: usize, axis: usize, cos: f32) -> Vec<f32> {
    let mut v = vec![0.0; dimension];
    v[0] = cos;
    v[axis] = (1.0 - cos * cos).sqrt();
    v
}

pub async fn group_count(store: &dyn VectorStore) -> usize {
    store.group_count().await.expect("Failed to count groups")
}
