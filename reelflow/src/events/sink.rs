//! Event sink trait and implementations.

use crate::core::ProgressEvent;
use async_trait::async_trait;
use tracing::{debug, info, Level};

/// Trait for sinks that receive workflow progress events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &ProgressEvent);

    /// Emits an event without blocking.
    ///
    /// This method never fails. Delivery problems are logged and suppressed.
    fn try_emit(&self, event: &ProgressEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &ProgressEvent) {}

    fn try_emit(&self, _event: &ProgressEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &ProgressEvent) {
        // Poll ticks are noisy; keep them at debug regardless of level.
        if self.level == Level::DEBUG || event.event_type == "job.poll_tick" {
            debug!(
                workflow_id = %event.workflow_id,
                event_type = %event.event_type,
                event_data = ?event.data,
                "Event: {}", event.event_type
            );
        } else {
            info!(
                workflow_id = %event.workflow_id,
                event_type = %event.event_type,
                event_data = ?event.data,
                "Event: {}", event.event_type
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &ProgressEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &ProgressEvent) {
        self.log_event(event);
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<ProgressEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event types in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.event_type.clone()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<ProgressEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &ProgressEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &ProgressEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageKind;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink;
        let event = ProgressEvent::new("test", Uuid::new_v4());
        sink.emit(&event).await;
        sink.try_emit(&event);
    }

    #[tokio::test]
    async fn test_logging_sink() {
        let sink = LoggingEventSink::default();
        let event = ProgressEvent::stage_entered(Uuid::new_v4(), StageKind::Fetch);
        sink.emit(&event).await;
        LoggingEventSink::debug().try_emit(&event);
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        let id = Uuid::new_v4();
        sink.emit(&ProgressEvent::workflow_started(id, "user-1", "doc-1")).await;
        sink.try_emit(&ProgressEvent::stage_entered(id, StageKind::Fetch));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.event_types(), vec!["workflow.started", "stage.entered"]);
    }

    #[tokio::test]
    async fn test_collecting_sink_filter_and_clear() {
        let sink = CollectingEventSink::new();
        let id = Uuid::new_v4();
        sink.try_emit(&ProgressEvent::stage_entered(id, StageKind::Fetch));
        sink.try_emit(&ProgressEvent::stage_entered(id, StageKind::Publish));
        sink.try_emit(&ProgressEvent::job_submitted(id, "job-1", 1));

        assert_eq!(sink.events_of_type("stage.").len(), 2);
        assert_eq!(sink.events_of_type("job.").len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }
}
