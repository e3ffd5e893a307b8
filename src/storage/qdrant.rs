//! Remote store backed by a Qdrant collection, spoken to over its REST API.
//!
//! Each group is one point: the representative vector plus a payload of
//! `count`, `last_seen` (Unix seconds as a float, for range filters) and
//! `metadata`. The collection gets payload indexes on `count` and
//! `last_seen` so top-N queries can filter and order server side.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::storage::{
    DEFAULT_COLLECTION, DEFAULT_MATCH_LIMIT, StoreError, StoreResult, VectorStore, window_start,
};
use crate::types::{ExceptionGroup, GroupId, GroupMetadata, TopException};
use crate::vector::{Score, SimilarityThreshold, VectorDimension};

const BACKEND: &str = "qdrant";

#[derive(Debug, Clone)]
pub struct QdrantOptions {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub max_matches: usize,
}

impl QdrantOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            collection: DEFAULT_COLLECTION.to_string(),
            max_matches: DEFAULT_MATCH_LIMIT,
        }
    }
}

/// Store backed by a Qdrant server.
///
/// Qdrant has no atomic payload increment, so `increment_occurrence` is a
/// read-modify-write guarded by a per-group async lock. The guard only
/// covers this process: several processes incrementing the same group
/// through one collection can still lose updates.
pub struct QdrantVectorStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    dimension: VectorDimension,
    max_matches: usize,
    increment_locks: DashMap<GroupId, Arc<tokio::sync::Mutex<()>>>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Debug, Deserialize)]
struct VectorParams {
    size: usize,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: serde_json::Value,
    #[serde(default)]
    payload: Option<GroupPayload>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GroupPayload {
    count: u64,
    last_seen: f64,
    metadata: GroupMetadata,
}

impl QdrantVectorStore {
    /// Connects to the server and makes sure the collection exists with the
    /// right vector size, creating it and its payload indexes if needed.
    ///
    /// # Errors
    /// [`StoreError::Unavailable`] if the server cannot be reached and
    /// [`StoreError::DimensionMismatch`] if the collection's vector size
    /// differs from `dimension`.
    pub async fn connect(options: QdrantOptions, dimension: VectorDimension) -> StoreResult<Self> {
        let store = Self {
            client: reqwest::Client::new(),
            base_url: options.url.trim_end_matches('/').to_string(),
            api_key: options.api_key,
            collection: options.collection,
            dimension,
            max_matches: options.max_matches,
            increment_locks: DashMap::new(),
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn ensure_collection(&self) -> StoreResult<()> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let response = self.request(reqwest::Method::GET, &url).send().await.map_err(unavailable)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::info!(collection = %self.collection, dimension = self.dimension.get(), "creating qdrant collection");
            self.send::<serde_json::Value>(
                reqwest::Method::PUT,
                &url,
                &json!({"vectors": {"size": self.dimension.get(), "distance": "Cosine"}}),
            )
            .await?;
            for (field, schema) in [("last_seen", "float"), ("count", "integer")] {
                self.send::<serde_json::Value>(
                    reqwest::Method::PUT,
                    &format!("{url}/index?wait=true"),
                    &json!({"field_name": field, "field_schema": schema}),
                )
                .await?;
            }
            return Ok(());
        }

        let info: CollectionInfo = parse_response(response).await?;
        let stored = info.config.params.vectors.size;
        if stored != self.dimension.get() {
            return Err(StoreError::DimensionMismatch {
                stored,
                requested: self.dimension.get(),
            });
        }
        tracing::debug!(collection = %self.collection, "using existing qdrant collection");
        Ok(())
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: &serde_json::Value,
    ) -> StoreResult<T> {
        let response = self
            .request(method, url)
            .json(body)
            .send()
            .await
            .map_err(unavailable)?;
        parse_response(response).await
    }

    fn points_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}/points{suffix}", self.base_url, self.collection)
    }

    async fn retrieve(&self, id: &serde_json::Value, with_vector: bool) -> StoreResult<Option<Record>> {
        let records: Vec<Record> = self
            .send(
                reqwest::Method::POST,
                &self.points_url(""),
                &json!({"ids": [id], "with_payload": true, "with_vector": with_vector}),
            )
            .await?;
        Ok(records.into_iter().next())
    }

    fn increment_lock(&self, group_id: &GroupId) -> Arc<tokio::sync::Mutex<()>> {
        self.increment_locks
            .entry(group_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drops the group's lock entry once no other increment holds a handle.
    fn release_increment_lock(&self, group_id: &GroupId) {
        self.increment_locks
            .remove_if(group_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn apply_increment(
        &self,
        id: &serde_json::Value,
        group_id: &GroupId,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        let payload = self
            .retrieve(id, false)
            .await?
            .and_then(|record| record.payload)
            .ok_or_else(|| StoreError::NotFound(group_id.clone()))?;

        let _: serde_json::Value = self
            .send(
                reqwest::Method::POST,
                &self.points_url("/payload?wait=true"),
                &json!({
                    "payload": {"count": payload.count + 1, "last_seen": to_epoch_seconds(timestamp)},
                    "points": [id],
                }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    async fn store_vector(
        &self,
        vector: Vec<f32>,
        metadata: GroupMetadata,
    ) -> StoreResult<GroupId> {
        self.dimension.validate_vector(&vector)?;
        let group_id = GroupId::generate();
        let payload = GroupPayload {
            count: 1,
            last_seen: to_epoch_seconds(Utc::now()),
            metadata,
        };

        let _: serde_json::Value = self
            .send(
                reqwest::Method::PUT,
                &self.points_url("?wait=true"),
                &json!({"points": [{"id": group_id.as_str(), "vector": vector, "payload": payload}]}),
            )
            .await?;
        Ok(group_id)
    }

    async fn find_similar(
        &self,
        vector: &[f32],
        threshold: SimilarityThreshold,
    ) -> StoreResult<Vec<(GroupId, Score)>> {
        self.dimension.validate_vector(vector)?;
        if self.max_matches == 0 {
            return Ok(Vec::new());
        }

        let points: Vec<ScoredPoint> = self
            .send(
                reqwest::Method::POST,
                &self.points_url("/search"),
                &json!({
                    "vector": vector,
                    "limit": self.max_matches,
                    "score_threshold": threshold.get(),
                    "with_payload": false,
                }),
            )
            .await?;

        let mut matches = Vec::with_capacity(points.len());
        for point in points {
            let score = Score::new(point.score)?;
            // The server already filters, this guards against float rounding
            if threshold.admits(score) {
                matches.push((point_id(&point.id)?, score));
            }
        }
        Ok(matches)
    }

    async fn increment_occurrence(
        &self,
        group_id: &GroupId,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        // Qdrant rejects anything but a UUID or an unsigned integer as an id
        let Some(id) = point_ref(group_id) else {
            return Err(StoreError::NotFound(group_id.clone()));
        };

        let lock = self.increment_lock(group_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_increment(&id, group_id, timestamp).await
        };
        drop(lock);
        self.release_increment_lock(group_id);
        result
    }

    async fn get_top_exceptions(
        &self,
        limit: usize,
        window: Duration,
    ) -> StoreResult<Vec<TopException>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let scroll: ScrollResult = self
            .send(
                reqwest::Method::POST,
                &self.points_url("/scroll"),
                &json!({
                    "filter": {"must": [{"key": "last_seen", "range": {
                        "gte": to_epoch_seconds(window_start(now, window)),
                        "lte": to_epoch_seconds(now),
                    }}]},
                    "limit": limit,
                    "with_payload": true,
                    "with_vector": false,
                    "order_by": {"key": "count", "direction": "desc"},
                }),
            )
            .await?;

        scroll
            .points
            .into_iter()
            .map(|record| {
                let group_id = point_id(&record.id)?;
                let payload = record.payload.ok_or_else(|| missing_payload(&group_id))?;
                Ok(TopException {
                    group_id,
                    count: payload.count,
                    last_seen: from_epoch_seconds(payload.last_seen),
                    metadata: payload.metadata,
                })
            })
            .collect()
    }

    async fn get_group(&self, group_id: &GroupId) -> StoreResult<Option<ExceptionGroup>> {
        let Some(id) = point_ref(group_id) else {
            return Ok(None);
        };
        let Some(record) = self.retrieve(&id, true).await? else {
            return Ok(None);
        };
        let payload = record.payload.ok_or_else(|| missing_payload(group_id))?;
        let vector = record.vector.ok_or_else(|| StoreError::UnexpectedResponse {
            backend: BACKEND,
            detail: format!("point {group_id} has no vector"),
        })?;
        Ok(Some(ExceptionGroup {
            group_id: group_id.clone(),
            representative_vector: vector,
            count: payload.count,
            last_seen: from_epoch_seconds(payload.last_seen),
            metadata: payload.metadata,
        }))
    }

    async fn group_count(&self) -> StoreResult<usize> {
        let result: CountResult = self
            .send(
                reqwest::Method::POST,
                &self.points_url("/count"),
                &json!({"exact": true}),
            )
            .await?;
        Ok(result.count)
    }
}

impl std::fmt::Debug for QdrantVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantVectorStore")
            .field("base_url", &self.base_url)
            .field("collection", &self.collection)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

fn unavailable(e: reqwest::Error) -> StoreError {
    StoreError::Unavailable {
        backend: BACKEND,
        reason: e.to_string(),
    }
}

fn missing_payload(group_id: &GroupId) -> StoreError {
    StoreError::UnexpectedResponse {
        backend: BACKEND,
        detail: format!("point {group_id} has no group payload"),
    }
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> StoreResult<T> {
    let status = response.status();
    if status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::Unavailable {
            backend: BACKEND,
            reason: format!("HTTP {status}: {body}"),
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::UnexpectedResponse {
            backend: BACKEND,
            detail: format!("HTTP {status}: {body}"),
        });
    }
    let body: ApiResponse<T> = response.json().await.map_err(|e| StoreError::UnexpectedResponse {
        backend: BACKEND,
        detail: e.to_string(),
    })?;
    Ok(body.result)
}

fn point_id(id: &serde_json::Value) -> StoreResult<GroupId> {
    match id {
        serde_json::Value::String(s) => Ok(GroupId::new(s.clone())),
        serde_json::Value::Number(n) => Ok(GroupId::new(n.to_string())),
        other => Err(StoreError::UnexpectedResponse {
            backend: BACKEND,
            detail: format!("unsupported point id {other}"),
        }),
    }
}

/// The group id as a Qdrant point id, or `None` if Qdrant cannot hold it.
fn point_ref(group_id: &GroupId) -> Option<serde_json::Value> {
    if let Some(uuid) = group_id.to_uuid() {
        return Some(json!(uuid.to_string()));
    }
    group_id.as_str().parse::<u64>().ok().map(|n| json!(n))
}

fn to_epoch_seconds(timestamp: DateTime<Utc>) -> f64 {
    timestamp.timestamp_micros() as f64 / 1_000_000.0
}

fn from_epoch_seconds(seconds: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64).unwrap_or_default()
}
