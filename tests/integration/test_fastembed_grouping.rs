//! Grouping with a real sentence-embedding model.
//!
//! These tests download the model on first run and are ignored by default:
//! `cargo test -- --ignored`

use std::sync::Arc;

use excgrouper::storage::MemoryVectorStore;
use excgrouper::vector::{FastEmbedEmbedder, FastEmbedOptions};
use excgrouper::{Embedder, GroupingEngine};

use crate::common::event;

/// Get a unique cache directory for each test to avoid conflicts
fn get_test_cache_dir(test_name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "excgrouper_test_fastembed_{}_{}",
        test_name,
        std::process::id()
    ))
}

fn model_engine(test_name: &str, threshold: f32) -> GroupingEngine {
    let options = FastEmbedOptions {
        cache_dir: Some(get_test_cache_dir(test_name)),
        ..FastEmbedOptions::default()
    };
    let embedder = FastEmbedEmbedder::new(&options).expect("Failed to load model");
    let store = MemoryVectorStore::new(embedder.dimension());
    GroupingEngine::new(Arc::new(embedder), Arc::new(store), threshold)
        .expect("Failed to build engine")
}

#[tokio::test]
#[ignore = "Downloads an embedding model"]
async fn test_model_groups_paraphrased_connection_errors() {
    let engine = model_engine("connection", 0.85);

    let first = engine
        .process(&event("ConnectionError", "Connection refused to database xyz123"))
        .await
        .unwrap();
    let second = engine
        .process(&event("ConnectionError", "Connection refused to database abc987"))
        .await
        .unwrap();
    let unrelated = engine
        .process(&event("ZeroDivisionError", "division by zero"))
        .await
        .unwrap();

    assert_eq!(first.group_id, second.group_id);
    assert!(second.confidence >= 0.85);
    assert_ne!(first.group_id, unrelated.group_id);
}
