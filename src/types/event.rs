use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type name recorded when a report does not say what kind of error it is.
pub const DEFAULT_EXCEPTION_TYPE: &str = "Unknown";

/// A single observed error occurrence.
///
/// Built once per incoming report and never mutated afterwards; only the
/// derived vector and the summary fields in [`GroupMetadata`](crate::types::GroupMetadata)
/// outlive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionEvent {
    message: String,
    #[serde(rename = "type")]
    exception_type: String,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    context: BTreeMap<String, serde_json::Value>,
}

impl ExceptionEvent {
    /// Creates an event of type "Unknown" timestamped now.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exception_type: DEFAULT_EXCEPTION_TYPE.to_string(),
            timestamp: Utc::now(),
            stack_trace: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the exception type. Blank names fall back to "Unknown".
    pub fn with_type(mut self, exception_type: impl Into<String>) -> Self {
        let exception_type = exception_type.into();
        if !exception_type.trim().is_empty() {
            self.exception_type = exception_type;
        }
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_context_map(mut self, context: BTreeMap<String, serde_json::Value>) -> Self {
        self.context.extend(context);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn exception_type(&self) -> &str {
        &self.exception_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    pub fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }
}
