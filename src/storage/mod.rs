//! Persistence of exception groups.
//!
//! Every backend implements [`VectorStore`]: similarity search over the
//! representative vectors plus the counters needed for frequency reports.
//!
//! - [`MemoryVectorStore`]: process-local, lost on exit.
//! - [`LocalVectorStore`]: embedded on-disk store under a directory.
//! - [`QdrantVectorStore`]: remote Qdrant collection over its REST API.

mod error;
mod journal;
mod local;
mod memory;
mod qdrant;
mod segment;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

pub use error::{StoreError, StoreResult};
pub use local::LocalVectorStore;
pub use memory::MemoryVectorStore;
pub use qdrant::{QdrantOptions, QdrantVectorStore};

use crate::types::{ExceptionGroup, GroupId, GroupMetadata, TopException};
use crate::vector::{Score, SimilarityThreshold, VectorDimension};

/// Upper bound on matches returned by `find_similar` unless configured otherwise.
pub const DEFAULT_MATCH_LIMIT: usize = 5;

/// Name of the collection holding exception groups.
pub const DEFAULT_COLLECTION: &str = "exceptions";

/// Storage contract the grouping engine relies on.
///
/// All operations are atomic: a failed call leaves no partially updated
/// group behind. Implementations must be safe to call concurrently.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs and error messages.
    fn backend(&self) -> &'static str;

    /// Dimension the store was provisioned with.
    fn dimension(&self) -> VectorDimension;

    /// Creates a group with `count = 1` and `last_seen = now`, returning its
    /// freshly generated id.
    async fn store_vector(
        &self,
        vector: Vec<f32>,
        metadata: GroupMetadata,
    ) -> StoreResult<GroupId>;

    /// Groups whose representative scores at least `threshold` against
    /// `vector`, best first, capped at the store's match limit.
    async fn find_similar(
        &self,
        vector: &[f32],
        threshold: SimilarityThreshold,
    ) -> StoreResult<Vec<(GroupId, Score)>>;

    /// Adds one occurrence and sets `last_seen` to `timestamp`.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] if the group does not exist; nothing is
    /// modified in that case.
    async fn increment_occurrence(
        &self,
        group_id: &GroupId,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Groups last seen within `window` of now, most frequent first.
    async fn get_top_exceptions(
        &self,
        limit: usize,
        window: Duration,
    ) -> StoreResult<Vec<TopException>>;

    /// Full record of one group, if it exists.
    async fn get_group(&self, group_id: &GroupId) -> StoreResult<Option<ExceptionGroup>>;

    /// Number of groups currently stored.
    async fn group_count(&self) -> StoreResult<usize>;
}

/// Start of a reporting window ending at `now`.
///
/// Windows reaching past the earliest representable time start there.
pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Shared top-N selection for stores that scan groups in memory.
///
/// Keeps groups with `last_seen` in `[now - window, now]`, orders them by
/// count descending, then most recent first, then by id, and truncates.
pub(crate) fn select_top_exceptions<'a>(
    groups: impl Iterator<Item = &'a ExceptionGroup>,
    limit: usize,
    window: Duration,
    now: DateTime<Utc>,
) -> Vec<TopException> {
    if limit == 0 {
        return Vec::new();
    }

    let since = window_start(now, window);
    let mut top: Vec<TopException> = groups
        .filter(|group| group.last_seen >= since && group.last_seen <= now)
        .map(TopException::from)
        .collect();

    top.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
            .then_with(|| a.group_id.cmp(&b.group_id))
    });
    top.truncate(limit);
    top
}
