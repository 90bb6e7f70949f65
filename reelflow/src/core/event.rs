//! Progress events emitted while a workflow runs.

use super::failure::FailureRecord;
use super::status::StageKind;
use crate::resilience::RemotePhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// An event describing workflow progress.
///
/// Events are consumed by event sinks for logging, progress reporting or
/// analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The event type (e.g., "stage.entered", "job.poll_tick").
    #[serde(rename = "type")]
    pub event_type: String,

    /// The workflow the event belongs to.
    pub workflow_id: Uuid,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl ProgressEvent {
    /// Creates a new event with no data.
    #[must_use]
    pub fn new(event_type: impl Into<String>, workflow_id: Uuid) -> Self {
        Self {
            event_type: event_type.into(),
            workflow_id,
            timestamp: Utc::now(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns a data field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Creates a "workflow.started" event.
    #[must_use]
    pub fn workflow_started(workflow_id: Uuid, identity: &str, identifier: &str) -> Self {
        Self::new("workflow.started", workflow_id)
            .add_data("identity", serde_json::json!(identity))
            .add_data("identifier", serde_json::json!(identifier))
    }

    /// Creates a "stage.entered" event.
    #[must_use]
    pub fn stage_entered(workflow_id: Uuid, stage: StageKind) -> Self {
        Self::new("stage.entered", workflow_id).add_data("stage", serde_json::json!(stage.name()))
    }

    /// Creates a "stage.retried" event.
    #[must_use]
    pub fn stage_retried(
        workflow_id: Uuid,
        stage: StageKind,
        failed_attempt: u32,
        delay: Duration,
        error: &str,
    ) -> Self {
        Self::new("stage.retried", workflow_id)
            .add_data("stage", serde_json::json!(stage.name()))
            .add_data("attempt", serde_json::json!(failed_attempt))
            .add_data("delay_ms", serde_json::json!(delay.as_millis() as u64))
            .add_data("error", serde_json::json!(error))
    }

    /// Creates a "stage.succeeded" event.
    #[must_use]
    pub fn stage_succeeded(workflow_id: Uuid, stage: StageKind, attempts: u32, duration_ms: f64) -> Self {
        Self::new("stage.succeeded", workflow_id)
            .add_data("stage", serde_json::json!(stage.name()))
            .add_data("attempts", serde_json::json!(attempts))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a "stage.failed" event.
    #[must_use]
    pub fn stage_failed(workflow_id: Uuid, failure: &FailureRecord) -> Self {
        Self::new("stage.failed", workflow_id)
            .add_data("stage", serde_json::json!(failure.stage.name()))
            .add_data("kind", serde_json::json!(failure.kind))
            .add_data("attempts", serde_json::json!(failure.attempts))
            .add_data("error", serde_json::json!(failure.message))
    }

    /// Creates a "job.submitted" event.
    #[must_use]
    pub fn job_submitted(workflow_id: Uuid, job_id: &str, submission: u32) -> Self {
        Self::new("job.submitted", workflow_id)
            .add_data("job_id", serde_json::json!(job_id))
            .add_data("submission", serde_json::json!(submission))
    }

    /// Creates a "job.poll_tick" event.
    #[must_use]
    pub fn job_poll_tick(
        workflow_id: Uuid,
        job_id: &str,
        attempt: u32,
        elapsed: Duration,
        phase: RemotePhase,
    ) -> Self {
        Self::new("job.poll_tick", workflow_id)
            .add_data("job_id", serde_json::json!(job_id))
            .add_data("attempt", serde_json::json!(attempt))
            .add_data("elapsed_ms", serde_json::json!(elapsed.as_millis() as u64))
            .add_data("phase", serde_json::json!(phase))
    }

    /// Creates a "job.resubmitted" event.
    #[must_use]
    pub fn job_resubmitted(workflow_id: Uuid, failed_job_id: &str, submission: u32) -> Self {
        Self::new("job.resubmitted", workflow_id)
            .add_data("failed_job_id", serde_json::json!(failed_job_id))
            .add_data("submission", serde_json::json!(submission))
    }

    /// Creates a "workflow.completed" event.
    #[must_use]
    pub fn workflow_completed(workflow_id: Uuid, published_url: Option<&str>, duration_ms: Option<i64>) -> Self {
        Self::new("workflow.completed", workflow_id)
            .add_data("published_url", serde_json::json!(published_url))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a "workflow.failed" event.
    #[must_use]
    pub fn workflow_failed(workflow_id: Uuid, failure: &FailureRecord) -> Self {
        Self::new("workflow.failed", workflow_id)
            .add_data("stage", serde_json::json!(failure.stage.name()))
            .add_data("kind", serde_json::json!(failure.kind))
            .add_data("error", serde_json::json!(failure.message))
    }
}
