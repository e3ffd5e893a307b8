//! Configuration module for exception grouping.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `EXCGROUPER_` and use double
//! underscores to separate nested levels:
//! - `EXCGROUPER_EMBEDDING__SIMILARITY_THRESHOLD=0.85` sets `embedding.similarity_threshold`
//! - `EXCGROUPER_STORAGE__LOCAL_URL=http://localhost:6333` sets `storage.local_url`
//! - `EXCGROUPER_EMBEDDING__KWARGS__MODEL=BGESmallENV15` sets `embedding.kwargs.model`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::GroupingError;
use crate::storage::{DEFAULT_COLLECTION, DEFAULT_MATCH_LIMIT};
use crate::vector::DEFAULT_SIMILARITY_THRESHOLD;

/// Directory name used both in the workspace and in the home directory.
pub const CONFIG_DIR_NAME: &str = ".excgrouper";
const SETTINGS_FILE_NAME: &str = "settings.toml";
const ENV_PREFIX: &str = "EXCGROUPER_";
const REDACTED: &str = "***";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Embedding model and grouping threshold
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Where exception groups are kept
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP service options
    #[serde(default)]
    pub server: ServerConfig,
}

/// Embedder implementation selected by `embedding.class`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Local sentence-embedding model
    #[default]
    #[serde(alias = "SentenceTransformerEmbedding", alias = "sentence_transformer")]
    Fastembed,
    /// OpenAI-compatible embeddings API
    #[serde(alias = "OpenAIEmbedding")]
    Openai,
    /// Offline feature hashing
    #[serde(alias = "HashingEmbedding")]
    Hashing,
}

impl std::fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fastembed => "fastembed",
            Self::Openai => "openai",
            Self::Hashing => "hashing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// Which embedder to use
    #[serde(default)]
    pub class: EmbedderKind,

    /// Minimum cosine similarity for an exception to join a group
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Embedder-specific options, decoded by the selected implementation
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    /// Directory of the embedded store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,

    /// URL of a Qdrant server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_url: Option<String>,

    /// URL of a remote grouping service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// API key for the remote service or Qdrant server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Collection holding the groups
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Maximum number of matches considered per exception
    #[serde(default = "default_max_matches")]
    pub max_matches: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP service listens on
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Also group panics of the server process itself
    #[serde(default = "default_false")]
    pub capture_panics: bool,
}

/// Resolved storage backend, in precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Qdrant server at `storage.local_url`
    Qdrant { url: String, api_key: Option<String> },
    /// Embedded store at `storage.local_path` or the default data directory
    Local { path: PathBuf },
    /// Remote grouping service at `storage.url`
    Cloud { url: String, api_key: Option<String> },
}

fn default_version() -> u32 {
    1
}
fn default_false() -> bool {
    false
}
fn default_similarity_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}
fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}
fn default_max_matches() -> usize {
    DEFAULT_MATCH_LIMIT
}
fn default_bind_address() -> String {
    "127.0.0.1:8000".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            debug: false,
            embedding: EmbeddingConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            class: EmbedderKind::default(),
            similarity_threshold: default_similarity_threshold(),
            kwargs: serde_json::Map::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: None,
            local_url: None,
            url: None,
            api_key: None,
            collection: default_collection(),
            max_matches: default_max_matches(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            capture_panics: false,
        }
    }
}

/// Per-user data directory, `~/.excgrouper`.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Where downloaded embedding models are cached.
pub fn models_dir() -> PathBuf {
    data_dir().join("models")
}

/// Default location of the embedded store.
pub fn default_storage_path() -> PathBuf {
    data_dir().join("storage")
}

/// Expands a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

impl StorageConfig {
    /// Picks the backend: `local_url`, then `local_path`, then `url`, then
    /// the default embedded store.
    pub fn backend(&self) -> StorageBackend {
        if let Some(url) = non_blank(&self.local_url) {
            return StorageBackend::Qdrant {
                url,
                api_key: self.api_key.clone(),
            };
        }
        if let Some(path) = &self.local_path {
            return StorageBackend::Local {
                path: expand_tilde(path),
            };
        }
        if let Some(url) = non_blank(&self.url) {
            return StorageBackend::Cloud {
                url,
                api_key: self.api_key.clone(),
            };
        }
        StorageBackend::Local {
            path: default_storage_path(),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl EmbeddingConfig {
    /// Decodes `kwargs` into the options type of the selected embedder.
    pub fn options<T: serde::de::DeserializeOwned>(&self) -> Result<T, GroupingError> {
        serde_json::from_value(serde_json::Value::Object(self.kwargs.clone())).map_err(|e| {
            GroupingError::configuration(format!(
                "Invalid embedding.kwargs for '{}': {e}",
                self.class
            ))
        })
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config().unwrap_or_else(Self::user_config_path);
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honouring environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.excgrouper/settings.toml` searching from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_file = ancestor.join(CONFIG_DIR_NAME).join(SETTINGS_FILE_NAME);
            if config_file.is_file() {
                return Some(config_file);
            }
        }

        None
    }

    /// `~/.excgrouper/settings.toml`
    pub fn user_config_path() -> PathBuf {
        data_dir().join(SETTINGS_FILE_NAME)
    }

    /// Rejects settings that cannot produce a working engine.
    pub fn validate(&self) -> Result<(), GroupingError> {
        let threshold = self.embedding.similarity_threshold;
        if threshold.is_nan() || !(0.0..=1.0).contains(&threshold) {
            return Err(GroupingError::configuration(format!(
                "embedding.similarity_threshold must be between 0 and 1, got {threshold}"
            )));
        }
        if self.storage.max_matches == 0 {
            return Err(GroupingError::configuration(
                "storage.max_matches must be at least 1",
            ));
        }
        if let StorageBackend::Cloud { url, .. } | StorageBackend::Qdrant { url, .. } =
            self.storage.backend()
        {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(GroupingError::configuration(format!(
                    "Storage URL '{url}' must start with http:// or https://"
                )));
            }
        }
        Ok(())
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut settings = self.clone();
        if settings.storage.api_key.is_some() {
            settings.storage.api_key = Some(REDACTED.to_string());
        }
        if let Some(key) = settings.embedding.kwargs.get_mut("api_key") {
            *key = serde_json::Value::String(REDACTED.to_string());
        }
        settings
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create `.excgrouper/settings.toml` in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR_NAME).join(SETTINGS_FILE_NAME);
        Self::init_config_file_at(&config_path, force)?;
        Ok(config_path)
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file_at(
        config_path: &Path,
        force: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# excgrouper configuration file

# Version of the configuration schema
version = 1

# Global debug mode
debug = false

[embedding]
# Embedder implementation: "fastembed", "openai" or "hashing"
class = "fastembed"

# Minimum cosine similarity for an exception to join an existing group
similarity_threshold = {threshold}

[embedding.kwargs]
# fastembed: model = "AllMiniLML6V2" (also AllMiniLML12V2, BGESmallENV15,
#            BGEBaseENV15, MultilingualE5Small, ParaphraseMLMiniLML12V2)
# openai:    model = "text-embedding-3-small", api_key = "...", dimensions = 512
# hashing:   dimension = 384

[storage]
# Embedded store directory (used unless local_url is set)
local_path = "~/{dir}/storage"

# Qdrant server, takes precedence over local_path
# local_url = "http://localhost:6333"

# Remote grouping service, used when neither local option is set
# url = "https://excgrouper.example.com"
# api_key = ""

collection = "{collection}"
max_matches = {max_matches}

[server]
# Address for 'excgrouper serve'
bind = "{bind}"

# Group panics of the server process as well
capture_panics = false
"#,
            threshold = DEFAULT_SIMILARITY_THRESHOLD,
            dir = CONFIG_DIR_NAME,
            collection = DEFAULT_COLLECTION,
            max_matches = DEFAULT_MATCH_LIMIT,
            bind = default_bind_address(),
        );

        std::fs::write(config_path, template)?;
        Ok(())
    }
}
