//! Grouping and frequency-report properties that hold for any input.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::common::{event, event_at, group_count, memory_engine};

#[tokio::test]
async fn test_dissimilar_exception_creates_new_group() {
    let engine = memory_engine();
    engine
        .process(&event("TimeoutError", "Request to payment gateway timed out"))
        .await
        .unwrap();

    let result = engine
        .process(&event("UnicodeDecodeError", "invalid start byte while decoding upload"))
        .await
        .unwrap();

    assert!(result.is_new_group);
    assert_eq!(result.confidence, 1.0);
    assert!(result.similar_group_ids.is_empty());
    let group = engine
        .store()
        .get_group(&result.group_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(group.count, 1);
    assert_eq!(group_count(engine.store().as_ref()).await, 2);
}

#[tokio::test]
async fn test_same_message_with_different_type_is_a_different_group() {
    let engine = memory_engine();
    let a = engine.process(&event("KeyError", "name")).await.unwrap();
    let b = engine.process(&event("NameError", "name")).await.unwrap();
    assert_ne!(a.group_id, b.group_id);
}

#[tokio::test]
async fn test_top_exceptions_respects_limit_and_window() {
    let engine = memory_engine();
    let now = Utc::now();

    let recent = engine
        .process(&event("KeyError", "Missing key 'order_id'"))
        .await
        .unwrap();
    engine
        .process(&event("KeyError", "Missing key 'order_id'"))
        .await
        .unwrap();

    // Last seen three days ago: outside a one-day window
    let stale = engine
        .process(&event("OSError", "No space left on device"))
        .await
        .unwrap();
    for _ in 0..5 {
        engine
            .process(&event_at("OSError", "No space left on device", now - Duration::days(3)))
            .await
            .unwrap();
    }

    engine
        .process(&event("ValueError", "could not convert string to float"))
        .await
        .unwrap();

    let top = engine.top_exceptions(10, Duration::days(1)).await.unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].group_id, recent.group_id);
    assert!(top.iter().all(|t| t.group_id != stale.group_id));
    assert!(top.iter().all(|t| t.last_seen >= now - Duration::days(1)));

    let wide = engine.top_exceptions(10, Duration::days(7)).await.unwrap();
    assert_eq!(wide[0].group_id, stale.group_id);
    assert_eq!(wide[0].count, 6);

    let limited = engine.top_exceptions(1, Duration::days(7)).await.unwrap();
    assert_eq!(limited.len(), 1);

    let none = engine.top_exceptions(0, Duration::days(7)).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_top_exceptions_is_read_only() {
    let engine = memory_engine();
    for message in ["Disk quota exceeded", "Disk quota exceeded", "Broken pipe"] {
        engine.process(&event("OSError", message)).await.unwrap();
    }

    let first = engine.top_exceptions(5, Duration::days(1)).await.unwrap();
    let second = engine.top_exceptions(5, Duration::days(1)).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_processing_loses_no_occurrences() {
    let engine = Arc::new(memory_engine());
    let seed = engine
        .process(&event("ConnectionError", "Connection reset by peer 10.0.0.1"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for worker in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            for i in 0..25 {
                let message = format!("Connection reset by peer 10.0.{worker}.{i}");
                let result = engine
                    .process(&event("ConnectionError", &message))
                    .await
                    .unwrap();
                assert!(!result.is_new_group);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let group = engine
        .store()
        .get_group(&seed.group_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(group.count, 1 + 8 * 25);
    assert_eq!(group_count(engine.store().as_ref()).await, 1);
}
