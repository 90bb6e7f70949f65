//! Tagged stage failures.

use super::status::StageKind;
use crate::errors::{ErrorKind, ReelflowError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of one stage: its value or the failure that ended the workflow.
pub type StageResult<T> = Result<T, FailureRecord>;

/// Immutable description of a stage failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Stage '{stage}' failed ({kind}): {message}")]
pub struct FailureRecord {
    /// The stage that failed.
    pub stage: StageKind,
    /// Classification of the final error.
    pub kind: ErrorKind,
    /// The final error message.
    pub message: String,
    /// Whether the final error was retryable by the policy table.
    pub retryable: bool,
    /// The error followed by its sources.
    pub cause_chain: Vec<String>,
    /// The dependency that failed, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency: Option<String>,
    /// Attempts made before giving up.
    pub attempts: u32,
}

impl FailureRecord {
    /// Builds a record from the error that ended `stage`.
    #[must_use]
    pub fn from_error(stage: StageKind, error: &ReelflowError, attempts: u32) -> Self {
        Self {
            stage,
            kind: error.kind(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            cause_chain: error.cause_chain(),
            dependency: error
                .dependency()
                .map(str::to_string)
                .or_else(|| stage.dependency().map(str::to_string)),
            attempts,
        }
    }

    /// Returns true if the workflow was cancelled rather than failing.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CollaboratorError, ValidationError};

    #[test]
    fn test_from_collaborator_error() {
        let err = ReelflowError::from(CollaboratorError::rate_limited("429 from docs api"));
        let record = FailureRecord::from_error(StageKind::Fetch, &err, 3);

        assert_eq!(record.stage, StageKind::Fetch);
        assert_eq!(record.kind, ErrorKind::RateLimited);
        assert!(record.retryable);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.dependency.as_deref(), Some("content"));
        assert!(record.to_string().contains("fetch"));
    }

    #[test]
    fn test_validation_failure_has_no_dependency() {
        let err = ReelflowError::from(ValidationError::new("identifier", "empty"));
        let record = FailureRecord::from_error(StageKind::Validate, &err, 0);

        assert_eq!(record.kind, ErrorKind::Validation);
        assert!(!record.retryable);
        assert!(record.dependency.is_none());
        assert!(!record.is_cancellation());
    }

    #[test]
    fn test_serialization_uses_stage_name() {
        let err = ReelflowError::Cancelled("user".to_string());
        let record = FailureRecord::from_error(StageKind::ProduceMedia, &err, 1);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["stage"], "produce-media");
        assert_eq!(json["kind"], "cancelled");
        assert!(record.is_cancellation());
    }
}
