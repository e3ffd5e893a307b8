use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ExceptionEvent;

/// Identifier of an exception group.
///
/// Generated by the store at creation time and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Wraps an identifier handed out by a store or a remote service.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random (v4) identifier.
    pub fn generate() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }

    /// Parses the identifier as a UUID, for backends that key records by one.
    pub fn to_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.0).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Summary captured from the first event of a group. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub first_seen: DateTime<Utc>,
    #[serde(rename = "type")]
    pub exception_type: String,
    pub example_message: String,
}

impl GroupMetadata {
    pub fn from_event(event: &ExceptionEvent) -> Self {
        Self {
            first_seen: event.timestamp(),
            exception_type: event.exception_type().to_string(),
            example_message: event.message().to_string(),
        }
    }
}

/// The persisted unit: one representative vector plus its running count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionGroup {
    pub group_id: GroupId,
    /// First-seen vector. Never re-centred as members join.
    pub representative_vector: Vec<f32>,
    pub count: u64,
    pub last_seen: DateTime<Utc>,
    pub metadata: GroupMetadata,
}

/// Outcome of one match-or-create decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingResult {
    pub group_id: GroupId,
    /// Cosine score of the chosen match, or 1.0 for a new group.
    pub confidence: f32,
    /// Runner-up matches in rank order, excluding `group_id`.
    pub similar_group_ids: Vec<GroupId>,
    pub is_new_group: bool,
}

/// One row of a top-N frequency report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopException {
    pub group_id: GroupId,
    pub count: u64,
    pub last_seen: DateTime<Utc>,
    pub metadata: GroupMetadata,
}

impl From<&ExceptionGroup> for TopException {
    fn from(group: &ExceptionGroup) -> Self {
        Self {
            group_id: group.group_id.clone(),
            count: group.count,
            last_seen: group.last_seen,
            metadata: group.metadata.clone(),
        }
    }
}
