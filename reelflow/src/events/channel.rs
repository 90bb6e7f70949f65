//! Bounded channel sink for streaming progress to another task.

use super::EventSink;
use crate::core::ProgressEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Default wait for channel capacity in [`EventSink::emit`].
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Forwards events into a bounded channel.
///
/// `try_emit` drops the event when the channel is full or closed. `emit`
/// waits for capacity for at most the send timeout and then drops, so a
/// stalled consumer delays a workflow by a bounded amount and never blocks it.
#[derive(Debug)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<ProgressEvent>,
    send_timeout: Duration,
    dropped: AtomicU64,
}

impl ChannelEventSink {
    /// Creates a sink and the receiver that consumes it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                send_timeout: DEFAULT_SEND_TIMEOUT,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Sets how long `emit` waits for capacity before dropping.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Number of events dropped so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self, event: &ProgressEvent, reason: &str) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            workflow_id = %event.workflow_id,
            event_type = %event.event_type,
            dropped,
            reason,
            "Progress event dropped"
        );
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: &ProgressEvent) {
        match self.tx.send_timeout(event.clone(), self.send_timeout).await {
            Ok(()) => {}
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => self.record_drop(event, "send timed out"),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => self.record_drop(event, "receiver closed"),
        }
    }

    fn try_emit(&self, event: &ProgressEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => self.record_drop(event, "queue full"),
            Err(mpsc::error::TrySendError::Closed(_)) => self.record_drop(event, "receiver closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageKind;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_forwards_events() {
        let (sink, mut rx) = ChannelEventSink::new(4);
        let event = ProgressEvent::stage_entered(Uuid::new_v4(), StageKind::Fetch);

        sink.try_emit(&event);
        sink.emit(&event).await;

        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let (sink, _rx) = ChannelEventSink::new(1);
        let event = ProgressEvent::new("job.poll_tick", Uuid::new_v4());

        sink.try_emit(&event);
        sink.try_emit(&event);
        sink.try_emit(&event);
        assert_eq!(sink.dropped(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_gives_up_on_stalled_consumer() {
        let (sink, _rx) = ChannelEventSink::new(1);
        let sink = sink.with_send_timeout(Duration::from_secs(1));
        let event = ProgressEvent::new("stage.entered", Uuid::new_v4());

        let started = tokio::time::Instant::now();
        sink.emit(&event).await;
        sink.emit(&event).await;
        sink.emit(&event).await;

        assert_eq!(sink.dropped(), 2);
        assert!(started.elapsed() <= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_closed_receiver_drops() {
        let (sink, rx) = ChannelEventSink::new(8);
        drop(rx);

        sink.emit(&ProgressEvent::new("workflow.started", Uuid::new_v4())).await;
        assert_eq!(sink.dropped(), 1);
    }
}
