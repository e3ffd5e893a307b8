//! Settings files as users write them.

use std::fs;

use excgrouper::config::{EmbedderKind, Settings, StorageBackend};
use excgrouper::vector::HashingOptions;
use tempfile::TempDir;

#[test]
fn test_generated_template_loads_with_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".excgrouper").join("settings.toml");

    Settings::init_config_file_at(&path, false).unwrap();
    let settings = Settings::load_from(&path).unwrap();

    assert_eq!(settings.embedding.class, EmbedderKind::Fastembed);
    assert_eq!(settings.embedding.similarity_threshold, 0.9);
    assert_eq!(settings.storage.collection, "exceptions");
    assert_eq!(settings.storage.max_matches, 5);
    assert!(matches!(settings.storage.backend(), StorageBackend::Local { .. }));
    settings.validate().unwrap();

    let err = Settings::init_config_file_at(&path, false).unwrap_err();
    assert!(err.to_string().contains("--force"));
}

#[test]
fn test_legacy_class_names_and_kwargs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.toml");
    fs::write(
        &path,
        r#"
[embedding]
class = "HashingEmbedding"
similarity_threshold = 0.85

[embedding.kwargs]
dimension = 128

[storage]
local_url = "http://localhost:6333"
local_path = "/var/lib/excgrouper"
api_key = "secret"
"#,
    )
    .unwrap();

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.embedding.class, EmbedderKind::Hashing);
    assert_eq!(settings.embedding.similarity_threshold, 0.85);

    let options: HashingOptions = settings.embedding.options().unwrap();
    assert_eq!(options.dimension, 128);

    assert_eq!(
        settings.storage.backend(),
        StorageBackend::Qdrant {
            url: "http://localhost:6333".to_string(),
            api_key: Some("secret".to_string()),
        }
    );

    let shown = toml::to_string_pretty(&settings.redacted()).unwrap();
    assert!(!shown.contains("secret"));
}

#[test]
fn test_out_of_range_threshold_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.toml");
    fs::write(&path, "[embedding]\nsimilarity_threshold = 1.2\n").unwrap();

    let settings = Settings::load_from(&path).unwrap();
    let err = settings.validate().unwrap_err();
    assert_eq!(err.status_code(), "CONFIGURATION_ERROR");
    assert!(err.to_string().contains("similarity_threshold"));
}
