//! Groups similar exceptions by the cosine similarity of their embeddings
//! and ranks the resulting groups by frequency.
//!
//! ```no_run
//! # async fn run() -> Result<(), excgrouper::GroupingError> {
//! use excgrouper::{ExceptionEvent, Grouper, Settings};
//!
//! let settings = Settings::load().unwrap_or_default();
//! let grouper = Grouper::from_settings(&settings).await?;
//!
//! let event = ExceptionEvent::new("Failed to connect to database xyz123")
//!     .with_type("ConnectionError");
//! let group_id = grouper.group_exception(&event).await?;
//! println!("Exception in group {group_id}");
//!
//! for top in grouper.top_exceptions(10, 1).await? {
//!     println!("{} x{}", top.metadata.example_message, top.count);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod grouper;
pub mod hook;
pub mod server;
pub mod storage;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use client::ServiceClient;
pub use config::{EmbedderKind, Settings, StorageBackend};
pub use engine::GroupingEngine;
pub use error::{EngineResult, ErrorContext, GroupingError};
pub use grouper::Grouper;
pub use storage::{LocalVectorStore, MemoryVectorStore, QdrantVectorStore, StoreError, VectorStore};
pub use types::{
    ExceptionEvent, ExceptionGroup, GroupId, GroupMetadata, GroupingResult, TopException,
};
pub use vector::{Embedder, HashingEmbedder, SimilarityThreshold, VectorError};
