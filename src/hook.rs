//! Automatic capture of application errors.
//!
//! Errors reach the grouper through a bounded channel. Capturing never
//! blocks or awaits inside the code that failed: when the channel is full
//! the event is dropped and counted instead.
//!
//! - [`GroupingLayer`] forwards `ERROR` level tracing events.
//! - [`install_panic_hook`] forwards panics.
//! - [`spawn_reporter`] drains the channel and groups each event.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tracing_subscriber::prelude::*;
//! # async fn run(grouper: excgrouper::Grouper) {
//! let (sender, receiver) = excgrouper::hook::exception_channel();
//! tracing_subscriber::registry()
//!     .with(tracing_subscriber::fmt::layer())
//!     .with(excgrouper::hook::GroupingLayer::new(sender.clone()))
//!     .init();
//! excgrouper::hook::install_panic_hook(sender);
//! excgrouper::hook::spawn_reporter(Arc::new(grouper), receiver);
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::grouper::Grouper;
use crate::types::ExceptionEvent;

/// Target of the reporter's own log lines. Events with this target are
/// never captured.
pub const REPORTER_TARGET: &str = "excgrouper::reporter";

/// Exception type recorded for panics.
pub const PANIC_TYPE: &str = "panic";

/// Field read as the exception type of a captured tracing event.
pub const ERROR_TYPE_FIELD: &str = "error_type";

/// Events the capture channel holds before new ones are dropped.
pub const DEFAULT_CAPTURE_CAPACITY: usize = 1024;

/// Sending half of the capture channel.
#[derive(Debug, Clone)]
pub struct ExceptionSender {
    tx: mpsc::Sender<ExceptionEvent>,
    dropped: Arc<AtomicU64>,
}

impl ExceptionSender {
    /// Queues an event without waiting.
    ///
    /// Returns `false` when the event was dropped, either because the
    /// channel is full or because the reporter has stopped.
    pub fn send(&self, event: ExceptionEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Events dropped so far because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving half of the capture channel.
#[derive(Debug)]
pub struct ExceptionReceiver {
    rx: mpsc::Receiver<ExceptionEvent>,
    dropped: Arc<AtomicU64>,
}

impl ExceptionReceiver {
    pub async fn recv(&mut self) -> Option<ExceptionEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<ExceptionEvent, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// Events senders dropped so far because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Capture channel holding up to [`DEFAULT_CAPTURE_CAPACITY`] events.
pub fn exception_channel() -> (ExceptionSender, ExceptionReceiver) {
    exception_channel_with_capacity(DEFAULT_CAPTURE_CAPACITY)
}

/// Capture channel holding up to `capacity` events (at least one).
pub fn exception_channel_with_capacity(capacity: usize) -> (ExceptionSender, ExceptionReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        ExceptionSender {
            tx,
            dropped: Arc::clone(&dropped),
        },
        ExceptionReceiver { rx, dropped },
    )
}

/// Builds an event from any error value.
///
/// The type name is the unqualified Rust type of `E` and the chain of
/// `source()` errors is recorded as the stack trace.
pub fn event_from_error<E: std::error::Error>(error: &E) -> ExceptionEvent {
    let mut event = ExceptionEvent::new(error.to_string()).with_type(short_type_name::<E>());

    let mut causes = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        causes.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    if !causes.is_empty() {
        event = event.with_stack_trace(causes.join("\n"));
    }
    event
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Tracing layer that turns `ERROR` events into exception events.
///
/// The `message` becomes the exception message, an `error_type` field the
/// exception type, and every other field is kept as context.
#[derive(Debug, Clone)]
pub struct GroupingLayer {
    sender: ExceptionSender,
}

impl GroupingLayer {
    pub fn new(sender: ExceptionSender) -> Self {
        Self { sender }
    }
}

impl<S: Subscriber> Layer<S> for GroupingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::ERROR || metadata.target() == REPORTER_TARGET {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        let Some(message) = visitor.message.filter(|m| !m.trim().is_empty()) else {
            return;
        };

        let mut captured = ExceptionEvent::new(message)
            .with_context_map(visitor.fields)
            .with_context("target", metadata.target());
        if let Some(error_type) = visitor.error_type {
            captured = captured.with_type(error_type);
        }
        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            captured = captured.with_stack_trace(format!("{file}:{line}"));
        }

        self.sender.send(captured);
    }
}

#[derive(Default)]
struct EventVisitor {
    message: Option<String>,
    error_type: Option<String>,
    fields: std::collections::BTreeMap<String, serde_json::Value>,
}

impl EventVisitor {
    fn record_value(&mut self, field: &Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            ERROR_TYPE_FIELD => self.error_type = Some(value.to_string()),
            _ => self.record_value(field, value.into()),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, value.into());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let text = format!("{value:?}");
        match field.name() {
            "message" => self.message = Some(text),
            ERROR_TYPE_FIELD => self.error_type = Some(text.trim_matches('"').to_string()),
            _ => self.record_value(field, text.into()),
        }
    }
}

/// Forwards panics to the capture channel, then runs the previous hook.
pub fn install_panic_hook(sender: ExceptionSender) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Box<dyn Any>".to_string());

        let mut event = ExceptionEvent::new(message).with_type(PANIC_TYPE);
        if let Some(location) = info.location() {
            event = event.with_stack_trace(location.to_string());
        }
        if let Some(name) = std::thread::current().name() {
            event = event.with_context("thread", name);
        }
        sender.send(event);

        previous(info);
    }));
}

/// Groups every captured event until all senders are dropped.
///
/// Resolves to the number of events that were grouped successfully.
pub fn spawn_reporter(grouper: Arc<Grouper>, mut receiver: ExceptionReceiver) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut grouped = 0;
        let mut reported_drops = 0;
        while let Some(event) = receiver.recv().await {
            let dropped = receiver.dropped();
            if dropped > reported_drops {
                tracing::warn!(
                    target: REPORTER_TARGET,
                    dropped = dropped - reported_drops,
                    total = dropped,
                    "Capture channel was full, exceptions were not grouped"
                );
                reported_drops = dropped;
            }

            match grouper.group_exception(&event).await {
                Ok(group_id) => {
                    grouped += 1;
                    tracing::info!(
                        target: REPORTER_TARGET,
                        %group_id,
                        "Exception in group {group_id}: {}",
                        event.message()
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        target: REPORTER_TARGET,
                        error = %e,
                        "Failed to group exception: {}",
                        event.message()
                    );
                }
            }
        }
        grouped
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbedderKind, Settings};
    use tempfile::TempDir;
    use tracing_subscriber::prelude::*;

    #[derive(Debug, thiserror::Error)]
    #[error("config unreadable")]
    struct ConfigUnreadable {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn test_layer_captures_error_events_only() {
        let (sender, mut receiver) = exception_channel();
        let subscriber = tracing_subscriber::registry().with(GroupingLayer::new(sender));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("just a warning");
            tracing::error!(error_type = "ConnectionError", host = "db-1", retries = 3, "Failed to connect");
            tracing::error!(target: REPORTER_TARGET, "Failed to group exception");
        });

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.message(), "Failed to connect");
        assert_eq!(event.exception_type(), "ConnectionError");
        assert_eq!(event.context()["host"], serde_json::json!("db-1"));
        assert_eq!(event.context()["retries"], serde_json::json!(3));
        assert!(event.stack_trace().is_some());
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_event_from_error_records_chain() {
        let error = ConfigUnreadable {
            source: std::io::Error::other("permission denied"),
        };
        let event = event_from_error(&error);

        assert_eq!(event.message(), "config unreadable");
        assert_eq!(event.exception_type(), "ConfigUnreadable");
        assert_eq!(event.stack_trace(), Some("caused by: permission denied"));
    }

    #[test]
    fn test_panic_hook_forwards_panics() {
        let (sender, mut receiver) = exception_channel();
        install_panic_hook(sender);

        let result = std::thread::Builder::new()
            .name("worker-7".to_string())
            .spawn(|| panic!("index 9 out of bounds"))
            .unwrap()
            .join();
        assert!(result.is_err());
        let _ = std::panic::take_hook();

        let mut found = None;
        while let Ok(event) = receiver.try_recv() {
            if event.message() == "index 9 out of bounds" {
                found = Some(event);
            }
        }
        let event = found.expect("panic should be captured");
        assert_eq!(event.exception_type(), PANIC_TYPE);
        assert_eq!(event.context()["thread"], serde_json::json!("worker-7"));
        assert!(event.stack_trace().unwrap().contains("hook.rs"));
    }

    #[test]
    fn test_full_channel_drops_and_counts() {
        let (sender, mut receiver) = exception_channel_with_capacity(1);

        assert!(sender.send(ExceptionEvent::new("first")));
        assert!(!sender.send(ExceptionEvent::new("second")));
        assert!(!sender.clone().send(ExceptionEvent::new("third")));
        assert_eq!(sender.dropped(), 2);
        assert_eq!(receiver.dropped(), 2);

        assert_eq!(receiver.try_recv().unwrap().message(), "first");
        assert!(receiver.try_recv().is_err());
        assert!(sender.send(ExceptionEvent::new("fourth")));

        drop(receiver);
        assert!(!sender.send(ExceptionEvent::new("fifth")));
        assert_eq!(sender.dropped(), 2);
    }

    #[tokio::test]
    async fn test_reporter_groups_captured_events() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.embedding.class = EmbedderKind::Hashing;
        settings.storage.local_path = Some(dir.path().to_path_buf());
        let grouper = Arc::new(Grouper::from_settings(&settings).await.unwrap());

        let (sender, receiver) = exception_channel();
        let handle = spawn_reporter(Arc::clone(&grouper), receiver);

        assert!(sender.send(ExceptionEvent::new("Timeout after 30s").with_type("TimeoutError")));
        assert!(sender.send(ExceptionEvent::new("Timeout after 45s").with_type("TimeoutError")));
        drop(sender);

        assert_eq!(handle.await.unwrap(), 2);
        let top = grouper.top_exceptions(5, 1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].count, 2);
    }
}
