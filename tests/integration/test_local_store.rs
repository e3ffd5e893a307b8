//! The embedded store keeps groups and counts across restarts.

use chrono::Duration;
use excgrouper::{ExceptionEvent, Grouper};
use tempfile::TempDir;

use crate::common::{event, hashing_settings, local_engine};

#[tokio::test]
async fn test_counts_survive_reopen() {
    let dir = TempDir::new().unwrap();

    let group_id = {
        let engine = local_engine(&dir);
        let first = engine
            .process(&event("FileNotFoundError", "No such file: config_42.yaml"))
            .await
            .unwrap();
        engine
            .process(&event("FileNotFoundError", "No such file: config_77.yaml"))
            .await
            .unwrap();
        first.group_id
    };

    let engine = local_engine(&dir);
    let result = engine
        .process(&event("FileNotFoundError", "No such file: config_90.yaml"))
        .await
        .unwrap();
    assert_eq!(result.group_id, group_id);
    assert!(!result.is_new_group);

    let top = engine.top_exceptions(5, Duration::days(1)).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].count, 3);
    assert_eq!(top[0].metadata.example_message, "No such file: config_42.yaml");
}

#[tokio::test]
async fn test_grouper_reports_from_reopened_store() {
    let dir = TempDir::new().unwrap();
    let settings = hashing_settings(&dir);

    {
        let grouper = Grouper::from_settings(&settings).await.unwrap();
        for _ in 0..3 {
            grouper
                .group_exception(&ExceptionEvent::new("Deadlock detected").with_type("DatabaseError"))
                .await
                .unwrap();
        }
        grouper
            .group_exception(&ExceptionEvent::new("Out of memory").with_type("MemoryError"))
            .await
            .unwrap();
    }

    let grouper = Grouper::from_settings(&settings).await.unwrap();
    let top = grouper.top_exceptions(10, 1).await.unwrap();
    let summary: Vec<(&str, u64)> = top
        .iter()
        .map(|t| (t.metadata.exception_type.as_str(), t.count))
        .collect();
    assert_eq!(summary, vec![("DatabaseError", 3), ("MemoryError", 1)]);
}

#[tokio::test]
async fn test_collections_are_isolated() {
    let dir = TempDir::new().unwrap();
    let mut settings = hashing_settings(&dir);

    let grouper = Grouper::from_settings(&settings).await.unwrap();
    grouper
        .group_exception(&ExceptionEvent::new("Broken pipe").with_type("OSError"))
        .await
        .unwrap();

    settings.storage.collection = "staging".to_string();
    let staging = Grouper::from_settings(&settings).await.unwrap();
    assert!(staging.top_exceptions(10, 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_in_use_is_reported_unavailable() {
    let dir = TempDir::new().unwrap();
    let settings = hashing_settings(&dir);

    let grouper = Grouper::from_settings(&settings).await.unwrap();
    let err = Grouper::from_settings(&settings).await.unwrap_err();
    assert_eq!(err.status_code(), "STORE_UNAVAILABLE");

    drop(grouper);
    Grouper::from_settings(&settings).await.unwrap();
}
