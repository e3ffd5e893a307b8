//! Embedded on-disk store.
//!
//! A collection lives in `<root>/<collection>/` as:
//!
//! - `vectors.vec`: representative vectors, see [`VectorSegment`]
//! - `groups.jsonl`: journal of `created` and `incremented` records
//! - `.lock`: held exclusively by the one handle that has the collection open
//!
//! The data files are append-only. Opening the store replays them into a
//! [`MemoryVectorStore`] which then serves all reads. A create writes the
//! vector before its journal record, so a crash in between leaves an
//! unreferenced vector that replay ignores rather than a group without one.

use std::collections::HashMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::storage::journal::{Journal, JournalRecord};
use crate::storage::segment::VectorSegment;
use crate::storage::{
    DEFAULT_COLLECTION, MemoryVectorStore, StoreError, StoreResult, VectorStore,
};
use crate::types::{ExceptionGroup, GroupId, GroupMetadata, TopException};
use crate::vector::{Score, SimilarityThreshold, VectorDimension};

const SEGMENT_FILE: &str = "vectors.vec";
const JOURNAL_FILE: &str = "groups.jsonl";
const LOCK_FILE: &str = ".lock";

struct Files {
    segment: VectorSegment,
    journal: Journal,
}

/// File-backed store for a single process.
///
/// Only one handle may have a collection open at a time, across processes.
/// All writes are serialized by one mutex covering both files; reads go to
/// the in-memory index without taking it.
pub struct LocalVectorStore {
    root: PathBuf,
    collection: String,
    index: MemoryVectorStore,
    files: Mutex<Files>,
    // Released when the store is dropped
    _lock: File,
}

impl LocalVectorStore {
    /// Opens (or creates) the default collection under `root`.
    pub fn open(root: impl AsRef<Path>, dimension: VectorDimension) -> StoreResult<Self> {
        Self::open_collection(root, DEFAULT_COLLECTION, dimension)
    }

    /// Opens (or creates) `collection` under `root` and replays its contents.
    ///
    /// # Errors
    /// [`StoreError::Unavailable`] when another handle already has the
    /// collection open, and [`StoreError::DimensionMismatch`] when the
    /// collection was created with a different vector dimension.
    pub fn open_collection(
        root: impl AsRef<Path>,
        collection: &str,
        dimension: VectorDimension,
    ) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        let dir = root.join(collection);
        std::fs::create_dir_all(&dir)?;
        let lock = lock_collection(&dir)?;

        let segment = VectorSegment::open_or_create(dir.join(SEGMENT_FILE), dimension)?;
        let journal = Journal::open(dir.join(JOURNAL_FILE))?;
        let index = MemoryVectorStore::new(dimension);

        let restored = replay(&segment, &journal, &index)?;
        tracing::info!(
            path = %dir.display(),
            groups = restored,
            dimension = dimension.get(),
            "opened local exception store"
        );

        Ok(Self {
            root,
            collection: collection.to_string(),
            index,
            files: Mutex::new(Files { segment, journal }),
            _lock: lock,
        })
    }

    pub fn with_max_matches(mut self, max_matches: usize) -> Self {
        self.index = self.index.with_max_matches(max_matches);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Takes the collection's advisory lock without waiting for it.
fn lock_collection(dir: &Path) -> StoreResult<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(LOCK_FILE))?;
    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(StoreError::Unavailable {
            backend: "local",
            reason: format!("collection at {} is already open elsewhere", dir.display()),
        }),
        Err(TryLockError::Error(e)) => Err(e.into()),
    }
}

/// Rebuilds the in-memory index from disk, returning how many groups exist.
fn replay(segment: &VectorSegment, journal: &Journal, index: &MemoryVectorStore) -> StoreResult<usize> {
    let mut vectors: HashMap<GroupId, Vec<f32>> = segment
        .read_all()?
        .into_iter()
        .map(|(uuid, vector)| (GroupId::from_uuid(uuid), vector))
        .collect();

    for record in journal.replay()? {
        match record {
            JournalRecord::Created {
                group_id,
                last_seen,
                metadata,
            } => {
                let Some(vector) = vectors.remove(&group_id) else {
                    tracing::warn!(%group_id, "journal references a group with no stored vector");
                    continue;
                };
                index.insert_group(ExceptionGroup {
                    group_id,
                    representative_vector: vector,
                    count: 1,
                    last_seen,
                    metadata,
                })?;
            }
            JournalRecord::Incremented {
                group_id,
                timestamp,
            } => {
                if let Err(StoreError::NotFound(group_id)) = index.apply_increment(&group_id, timestamp) {
                    tracing::warn!(%group_id, "journal increments an unknown group");
                }
            }
        }
    }

    if !vectors.is_empty() {
        tracing::warn!(
            orphans = vectors.len(),
            "ignoring stored vectors without a journal record"
        );
    }

    Ok(index.len())
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    fn dimension(&self) -> VectorDimension {
        self.index.dimension()
    }

    async fn store_vector(
        &self,
        vector: Vec<f32>,
        metadata: GroupMetadata,
    ) -> StoreResult<GroupId> {
        self.index.dimension().validate_vector(&vector)?;

        let uuid = uuid::Uuid::new_v4();
        let group_id = GroupId::from_uuid(uuid);
        let last_seen = Utc::now();

        let mut files = self.files.lock();
        files.segment.append(uuid, &vector)?;
        files.journal.append(&JournalRecord::Created {
            group_id: group_id.clone(),
            last_seen,
            metadata: metadata.clone(),
        })?;
        self.index.insert_group(ExceptionGroup {
            group_id: group_id.clone(),
            representative_vector: vector,
            count: 1,
            last_seen,
            metadata,
        })?;

        Ok(group_id)
    }

    async fn find_similar(
        &self,
        vector: &[f32],
        threshold: SimilarityThreshold,
    ) -> StoreResult<Vec<(GroupId, Score)>> {
        self.index.rank(vector, threshold)
    }

    async fn increment_occurrence(
        &self,
        group_id: &GroupId,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut files = self.files.lock();
        if !self.index.contains(group_id) {
            return Err(StoreError::NotFound(group_id.clone()));
        }
        files.journal.append(&JournalRecord::Incremented {
            group_id: group_id.clone(),
            timestamp,
        })?;
        self.index.apply_increment(group_id, timestamp)?;
        Ok(())
    }

    async fn get_top_exceptions(
        &self,
        limit: usize,
        window: Duration,
    ) -> StoreResult<Vec<TopException>> {
        Ok(self.index.top(limit, window))
    }

    async fn get_group(&self, group_id: &GroupId) -> StoreResult<Option<ExceptionGroup>> {
        Ok(self.index.snapshot(group_id))
    }

    async fn group_count(&self) -> StoreResult<usize> {
        Ok(self.index.len())
    }
}

impl std::fmt::Debug for LocalVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalVectorStore")
            .field("root", &self.root)
            .field("collection", &self.collection)
            .field("groups", &self.index.len())
            .finish()
    }
}
