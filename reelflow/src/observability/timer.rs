//! Span timing for stages and workflows.

use tokio::time::Instant;
use tracing::{info_span, Span};
use uuid::Uuid;

/// Simple span timing helper.
///
/// Uses tokio's clock so durations follow a paused test clock.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        let duration_ms = self.elapsed_ms();
        tracing::debug!(span_name = %self.name, duration_ms, "Span finished");
        duration_ms
    }
}

/// Creates the span that wraps one workflow run.
#[must_use]
pub fn workflow_span(workflow_id: Uuid, identity: &str) -> Span {
    info_span!("workflow", %workflow_id, identity)
}

/// Creates the span that wraps one stage.
#[must_use]
pub fn stage_span(stage: &str, dependency: Option<&str>) -> Span {
    info_span!("stage", stage, dependency = dependency.unwrap_or("none"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_span_timer() {
        let timer = SpanTimer::start("fetch");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(timer.name(), "fetch");
        let duration = timer.finish();
        assert!((duration - 250.0).abs() < 1.0);
    }

    #[test]
    fn test_spans_build_without_subscriber() {
        let _workflow = workflow_span(Uuid::new_v4(), "user-1").entered();
        let _stage = stage_span("fetch", Some("content"));
    }
}
