//! Workflow requests and the records that track them.

use super::failure::FailureRecord;
use super::status::{StageKind, StepStatus, WorkflowStatus};
use crate::collaborators::{Content, MediaRef, PublishedRef, Script};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// A request to turn one document into a published video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    /// Who asked; at most one workflow per identity is in flight.
    pub identity: String,
    /// The source document identifier.
    pub identifier: String,
    /// Optional steering hint for script generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl WorkflowRequest {
    /// Creates a request without a hint.
    #[must_use]
    pub fn new(identity: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            identifier: identifier.into(),
            hint: None,
        }
    }

    /// Sets the script hint.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Record of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// The stage.
    pub stage: StageKind,
    /// Current status.
    pub status: StepStatus,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Attempts after the first.
    pub retries: u32,
    /// When the step started.
    pub started_at: DateTime<Utc>,
    /// When the step finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure message, if the step failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The evolving state of one workflow.
///
/// Steps are only appended. Once the status is terminal it never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Unique workflow id.
    pub workflow_id: Uuid,
    /// Requesting identity.
    pub identity: String,
    /// Source document identifier.
    pub identifier: String,
    /// Script hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Current status.
    pub status: WorkflowStatus,
    /// Fetched content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// Generated script.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,
    /// Rendered media.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    /// Published video.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<PublishedRef>,
    /// Steps in execution order.
    pub steps: Vec<StepRecord>,
    /// The failure that ended the workflow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the workflow reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRecord {
    /// Creates a pending record for `request`.
    #[must_use]
    pub fn new(request: &WorkflowRequest) -> Self {
        Self {
            workflow_id: Uuid::new_v4(),
            identity: request.identity.clone(),
            identifier: request.identifier.clone(),
            hint: request.hint.clone(),
            status: WorkflowStatus::Pending,
            content: None,
            script: None,
            media: None,
            published: None,
            steps: Vec::new(),
            failure: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Moves to `next` if the transition is legal. Returns false otherwise.
    pub fn transition(&mut self, next: WorkflowStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                workflow_id = %self.workflow_id,
                from = %self.status,
                to = %next,
                "Ignoring illegal workflow transition"
            );
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    /// Returns true if the workflow has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Appends a running step for `stage`.
    pub fn begin_step(&mut self, stage: StageKind) {
        self.steps.push(StepRecord {
            stage,
            status: StepStatus::Running,
            attempts: 0,
            retries: 0,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        });
    }

    /// Marks the latest step for `stage` as succeeded.
    pub fn complete_step(&mut self, stage: StageKind, attempts: u32) {
        if let Some(step) = self.running_step_mut(stage) {
            step.status = StepStatus::Succeeded;
            step.attempts = attempts;
            step.retries = attempts.saturating_sub(1);
            step.completed_at = Some(Utc::now());
        }
    }

    /// Marks the step for the failure's stage as failed and fails the workflow.
    pub fn fail(&mut self, failure: FailureRecord) {
        if let Some(step) = self.running_step_mut(failure.stage) {
            step.status = StepStatus::Failed;
            step.attempts = failure.attempts;
            step.retries = failure.attempts.saturating_sub(1);
            step.completed_at = Some(Utc::now());
            step.error = Some(failure.message.clone());
        }
        if self.transition(WorkflowStatus::Failed) {
            self.failure = Some(failure);
        }
    }

    /// Returns the latest step record for `stage`.
    #[must_use]
    pub fn step(&self, stage: StageKind) -> Option<&StepRecord> {
        self.steps.iter().rev().find(|s| s.stage == stage)
    }

    /// Returns the retries recorded for `stage`, or 0 if it never ran.
    #[must_use]
    pub fn retries(&self, stage: StageKind) -> u32 {
        self.step(stage).map_or(0, |s| s.retries)
    }

    /// Returns the workflow duration in milliseconds, once terminal.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.created_at).num_milliseconds())
    }

    fn running_step_mut(&mut self, stage: StageKind) -> Option<&mut StepRecord> {
        self.steps
            .iter_mut()
            .rev()
            .find(|s| s.stage == stage && s.status == StepStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CollaboratorError, ReelflowError};
    use pretty_assertions::assert_eq;

    fn request() -> WorkflowRequest {
        WorkflowRequest::new("user-1", "doc-42").with_hint("keep it short")
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = WorkflowRecord::new(&request());
        assert_eq!(record.status, WorkflowStatus::Pending);
        assert_eq!(record.identity, "user-1");
        assert_eq!(record.hint.as_deref(), Some("keep it short"));
        assert!(record.steps.is_empty());
        assert!(record.duration_ms().is_none());
    }

    #[test]
    fn test_step_lifecycle() {
        let mut record = WorkflowRecord::new(&request());
        assert!(record.transition(WorkflowStatus::Running));

        record.begin_step(StageKind::Fetch);
        assert_eq!(record.step(StageKind::Fetch).unwrap().status, StepStatus::Running);

        record.complete_step(StageKind::Fetch, 3);
        let step = record.step(StageKind::Fetch).unwrap();
        assert_eq!(step.status, StepStatus::Succeeded);
        assert_eq!((step.attempts, step.retries), (3, 2));
        assert_eq!(record.retries(StageKind::Fetch), 2);
        assert_eq!(record.retries(StageKind::Publish), 0);
    }

    #[test]
    fn test_fail_records_failure_once() {
        let mut record = WorkflowRecord::new(&request());
        record.transition(WorkflowStatus::Running);
        record.begin_step(StageKind::Publish);

        let err = ReelflowError::from(CollaboratorError::quota_exceeded("daily quota"));
        let failure = FailureRecord::from_error(StageKind::Publish, &err, 1);
        record.fail(failure.clone());

        assert_eq!(record.status, WorkflowStatus::Failed);
        assert_eq!(record.failure.as_ref(), Some(&failure));
        assert_eq!(record.step(StageKind::Publish).unwrap().status, StepStatus::Failed);
        assert!(record.completed_at.is_some());

        // Terminal records never change status.
        assert!(!record.transition(WorkflowStatus::Succeeded));
        assert_eq!(record.status, WorkflowStatus::Failed);
    }

    #[test]
    fn test_record_serialization() {
        let mut record = WorkflowRecord::new(&request());
        record.transition(WorkflowStatus::Running);
        record.transition(WorkflowStatus::Succeeded);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["identifier"], "doc-42");
        assert!(json.get("failure").is_none());
    }
}
