//! Client for a remote grouping service, plus the wire types it shares with
//! [`server`](crate::server).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, GroupingError};
use crate::types::{DEFAULT_EXCEPTION_TYPE, ExceptionEvent, GroupId, TopException};

const BACKEND: &str = "service";

/// Body of `POST /process`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub message: String,
    #[serde(rename = "type", default = "default_exception_type")]
    pub exception_type: String,
    /// Defaults to the time the service receives the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

fn default_exception_type() -> String {
    DEFAULT_EXCEPTION_TYPE.to_string()
}

impl ProcessRequest {
    pub fn from_event(event: &ExceptionEvent) -> Self {
        Self {
            message: event.message().to_string(),
            exception_type: event.exception_type().to_string(),
            timestamp: Some(event.timestamp()),
            stack_trace: event.stack_trace().map(str::to_string),
            context: event.context().clone(),
        }
    }

    pub fn into_event(self) -> ExceptionEvent {
        let mut event = ExceptionEvent::new(self.message)
            .with_type(self.exception_type)
            .with_context_map(self.context);
        if let Some(timestamp) = self.timestamp {
            event = event.with_timestamp(timestamp);
        }
        if let Some(stack_trace) = self.stack_trace {
            event = event.with_stack_trace(stack_trace);
        }
        event
    }
}

/// Body returned by `POST /process`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub group_id: GroupId,
}

pub const DEFAULT_TOP_LIMIT: usize = 10;
pub const DEFAULT_TOP_DAYS: u32 = 1;

/// Query string of `GET /top_exceptions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopExceptionsQuery {
    #[serde(default = "default_top_limit")]
    pub limit: usize,
    #[serde(default = "default_top_days")]
    pub days: u32,
}

fn default_top_limit() -> usize {
    DEFAULT_TOP_LIMIT
}

fn default_top_days() -> u32 {
    DEFAULT_TOP_DAYS
}

impl Default for TopExceptionsQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_TOP_LIMIT,
            days: DEFAULT_TOP_DAYS,
        }
    }
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// HTTP client for `excgrouper serve` or any service with the same API.
#[derive(Clone)]
pub struct ServiceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ServiceClient {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        let url = url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends one exception for grouping and returns its group id.
    pub async fn process(&self, event: &ExceptionEvent) -> EngineResult<GroupId> {
        let response = self
            .request(reqwest::Method::POST, "process")
            .json(&ProcessRequest::from_event(event))
            .send()
            .await
            .map_err(unavailable)?;
        let body: ProcessResponse = parse_response(response).await?;
        Ok(body.group_id)
    }

    /// Most frequent groups of the last `days` days.
    pub async fn top_exceptions(&self, limit: usize, days: u32) -> EngineResult<Vec<TopException>> {
        let response = self
            .request(reqwest::Method::GET, "top_exceptions")
            .query(&TopExceptionsQuery { limit, days })
            .send()
            .await
            .map_err(unavailable)?;
        parse_response(response).await
    }

    /// Checks that the service answers.
    pub async fn health(&self) -> EngineResult<()> {
        let response = self
            .request(reqwest::Method::GET, "health")
            .send()
            .await
            .map_err(unavailable)?;
        let _: serde_json::Value = parse_response(response).await?;
        Ok(())
    }

    fn request(&self, method: reqwest::Method, endpoint: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{endpoint}", self.base_url));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.api_key.is_some())
            .finish()
    }
}

fn unavailable(e: reqwest::Error) -> GroupingError {
    GroupingError::StoreUnavailable {
        backend: BACKEND,
        reason: e.to_string(),
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> EngineResult<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let (code, detail) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.code.unwrap_or_else(|| format!("HTTP_{}", status.as_u16())), body.detail),
            Err(_) => (format!("HTTP_{}", status.as_u16()), text),
        };
        return Err(GroupingError::Remote {
            status: status.as_u16(),
            code,
            detail,
        });
    }
    response.json().await.map_err(|e| GroupingError::Remote {
        status: status.as_u16(),
        code: "INVALID_RESPONSE".to_string(),
        detail: e.to_string(),
    })
}
