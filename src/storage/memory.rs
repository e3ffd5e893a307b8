use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::storage::{
    DEFAULT_MATCH_LIMIT, StoreError, StoreResult, VectorStore, select_top_exceptions,
};
use crate::types::{ExceptionGroup, GroupId, GroupMetadata, TopException};
use crate::vector::{Score, SimilarityThreshold, VectorDimension, rank_by_similarity};

#[derive(Debug)]
struct StoredGroup {
    /// Insertion order, used as the native order for score ties.
    seq: u64,
    group: ExceptionGroup,
}

/// In-process store backed by a concurrent hash map.
///
/// Increments take the entry's shard write lock, so concurrent increments of
/// the same group never lose updates. Also serves as the in-memory index of
/// [`LocalVectorStore`](crate::storage::LocalVectorStore).
#[derive(Debug)]
pub struct MemoryVectorStore {
    dimension: VectorDimension,
    max_matches: usize,
    groups: DashMap<GroupId, StoredGroup>,
    next_seq: AtomicU64,
}

impl MemoryVectorStore {
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            max_matches: DEFAULT_MATCH_LIMIT,
            groups: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Caps how many matches `find_similar` returns.
    pub fn with_max_matches(mut self, max_matches: usize) -> Self {
        self.max_matches = max_matches;
        self
    }

    pub fn max_matches(&self) -> usize {
        self.max_matches
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Inserts a fully formed group, as when replaying persisted state.
    pub(crate) fn insert_group(&self, group: ExceptionGroup) -> StoreResult<()> {
        self.dimension.validate_vector(&group.representative_vector)?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.groups
            .insert(group.group_id.clone(), StoredGroup { seq, group });
        Ok(())
    }

    pub(crate) fn contains(&self, group_id: &GroupId) -> bool {
        self.groups.contains_key(group_id)
    }

    /// Increments under the entry lock and returns the new count.
    pub(crate) fn apply_increment(
        &self,
        group_id: &GroupId,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut entry = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| StoreError::NotFound(group_id.clone()))?;
        entry.group.count += 1;
        entry.group.last_seen = timestamp;
        Ok(entry.group.count)
    }

    pub(crate) fn rank(
        &self,
        vector: &[f32],
        threshold: SimilarityThreshold,
    ) -> StoreResult<Vec<(GroupId, Score)>> {
        self.dimension.validate_vector(vector)?;

        let entries: Vec<_> = self.groups.iter().collect();
        let mut stored: Vec<&StoredGroup> = entries.iter().map(|entry| entry.value()).collect();
        stored.sort_by_key(|s| s.seq);

        let candidates: Vec<(&GroupId, &[f32])> = stored
            .iter()
            .map(|s| (&s.group.group_id, s.group.representative_vector.as_slice()))
            .collect();

        Ok(
            rank_by_similarity(vector, &candidates, threshold, self.max_matches)
                .into_iter()
                .map(|(id, score)| (id.clone(), score))
                .collect(),
        )
    }

    pub(crate) fn top(&self, limit: usize, window: Duration) -> Vec<TopException> {
        let entries: Vec<_> = self.groups.iter().collect();
        select_top_exceptions(
            entries.iter().map(|entry| &entry.value().group),
            limit,
            window,
            Utc::now(),
        )
    }

    pub(crate) fn snapshot(&self, group_id: &GroupId) -> Option<ExceptionGroup> {
        self.groups.get(group_id).map(|entry| entry.group.clone())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    async fn store_vector(
        &self,
        vector: Vec<f32>,
        metadata: GroupMetadata,
    ) -> StoreResult<GroupId> {
        let group_id = GroupId::generate();
        self.insert_group(ExceptionGroup {
            group_id: group_id.clone(),
            representative_vector: vector,
            count: 1,
            last_seen: Utc::now(),
            metadata,
        })?;
        Ok(group_id)
    }

    async fn find_similar(
        &self,
        vector: &[f32],
        threshold: SimilarityThreshold,
    ) -> StoreResult<Vec<(GroupId, Score)>> {
        self.rank(vector, threshold)
    }

    async fn increment_occurrence(
        &self,
        group_id: &GroupId,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.apply_increment(group_id, timestamp).map(|_| ())
    }

    async fn get_top_exceptions(
        &self,
        limit: usize,
        window: Duration,
    ) -> StoreResult<Vec<TopException>> {
        Ok(self.top(limit, window))
    }

    async fn get_group(&self, group_id: &GroupId) -> StoreResult<Option<ExceptionGroup>> {
        Ok(self.snapshot(group_id))
    }

    async fn group_count(&self) -> StoreResult<usize> {
        Ok(self.len())
    }
}
