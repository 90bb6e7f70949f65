//! Error types for the reelflow orchestration core.
//!
//! Every failure that can reach a caller is a [`ReelflowError`]. Collaborators
//! report a [`CollaboratorError`] tagged with an [`ErrorKind`], and the kind
//! decides whether the resilience layer may retry it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a failure, used by the retry policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The requested document does not exist.
    NotFound,
    /// The dependency throttled the request.
    RateLimited,
    /// A transient or 5xx-style failure.
    Transient,
    /// The dependency rejected the input as malformed.
    InvalidInput,
    /// Credentials were missing or rejected.
    AuthFailure,
    /// Quota is exhausted and will not recover within this workflow.
    QuotaExceeded,
    /// Script generation failed.
    Generation,
    /// The render job could not be submitted.
    Submission,
    /// The remote render job reported failure.
    JobFailed,
    /// Publishing was rejected.
    Publish,
    /// An attempt or session exceeded its deadline.
    Timeout,
    /// A polling session ran past its overall deadline.
    TimedOut,
    /// The dependency's circuit is open.
    CircuitOpen,
    /// The workflow was cancelled.
    Cancelled,
    /// Another workflow is in flight for the same identity.
    Busy,
    /// Invalid caller input.
    Validation,
    /// Invalid configuration.
    Configuration,
    /// Anything the policy table does not recognise.
    Unexpected,
}

impl ErrorKind {
    /// Returns true if the policy table allows retrying this kind.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient | Self::Timeout)
    }

    /// Returns true if a failure of this kind says something about the
    /// dependency's health and should count toward its circuit breaker.
    #[must_use]
    pub fn affects_dependency_health(self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::Transient
                | Self::Timeout
                | Self::TimedOut
                | Self::JobFailed
                | Self::Submission
                | Self::Unexpected
        )
    }

    /// Returns the stable snake_case name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::InvalidInput => "invalid_input",
            Self::AuthFailure => "auth_failure",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Generation => "generation",
            Self::Submission => "submission",
            Self::JobFailed => "job_failed",
            Self::Publish => "publish",
            Self::Timeout => "timeout",
            Self::TimedOut => "timed_out",
            Self::CircuitOpen => "circuit_open",
            Self::Cancelled => "cancelled",
            Self::Busy => "busy",
            Self::Validation => "validation",
            Self::Configuration => "configuration",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for reelflow operations.
#[derive(Debug, Error)]
pub enum ReelflowError {
    /// Invalid configuration, surfaced at startup.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Invalid caller input.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A collaborator call failed.
    #[error("{0}")]
    Dependency(#[from] CollaboratorError),

    /// A call was short-circuited by an open breaker.
    #[error("{0}")]
    CircuitOpen(#[from] CircuitOpenError),

    /// An attempt or session exceeded its deadline.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// The identity already has a workflow in flight.
    #[error("{0}")]
    Busy(#[from] BusyError),

    /// The remote render job finished in a failed state.
    #[error("Render job {job_id} failed: {message}")]
    JobFailed {
        /// The remote job identifier.
        job_id: String,
        /// The failure reported by the remote producer.
        message: String,
    },

    /// The operation was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReelflowError {
    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Dependency(e) => e.kind,
            Self::CircuitOpen(_) => ErrorKind::CircuitOpen,
            Self::Timeout(e) if e.polling_session => ErrorKind::TimedOut,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Busy(_) => ErrorKind::Busy,
            Self::JobFailed { .. } => ErrorKind::JobFailed,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Unexpected,
        }
    }

    /// Returns true if the default policy table allows retrying this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Returns the dependency this error originated from, if known.
    #[must_use]
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::Dependency(e) => e.dependency.as_deref(),
            Self::CircuitOpen(e) => Some(&e.dependency),
            _ => None,
        }
    }

    /// Collects this error's message followed by every source in its chain.
    #[must_use]
    pub fn cause_chain(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let message = err.to_string();
            if chain.last() != Some(&message) {
                chain.push(message);
            }
            source = err.source();
        }
        chain
    }
}

/// Error raised when configuration is invalid.
#[derive(Debug, Clone, Error)]
#[error("Configuration error in '{field}': {message}")]
pub struct ConfigurationError {
    /// The offending field path.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error raised when caller input is rejected before any stage runs.
#[derive(Debug, Clone, Error)]
#[error("Invalid {field}: {message}")]
pub struct ValidationError {
    /// The rejected input field.
    pub field: String,
    /// Why it was rejected.
    pub message: String,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error reported by an external collaborator.
#[derive(Debug, Error)]
#[error("{}{message}", dependency_prefix(.dependency))]
pub struct CollaboratorError {
    /// Classification used by the retry policy table.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// The dependency that failed, filled in by the orchestrator when absent.
    pub dependency: Option<String>,
    /// Optional HTTP-style status code.
    pub status_code: Option<u16>,
    /// Underlying cause.
    #[source]
    pub source: Option<anyhow::Error>,
}

impl CollaboratorError {
    /// Creates a new collaborator error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            dependency: None,
            status_code: None,
            source: None,
        }
    }

    /// The requested document does not exist.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// The dependency throttled the request.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message).with_status(429)
    }

    /// A transient failure worth retrying.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Script generation failed.
    #[must_use]
    pub fn generation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generation, message)
    }

    /// Render job submission failed.
    #[must_use]
    pub fn submission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Submission, message)
    }

    /// Publishing failed.
    #[must_use]
    pub fn publish(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Publish, message)
    }

    /// Upload quota is exhausted.
    #[must_use]
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message).with_status(403)
    }

    /// Credentials were rejected.
    #[must_use]
    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailure, message).with_status(401)
    }

    /// Wraps an unclassified error; never retried.
    #[must_use]
    pub fn unexpected(source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unexpected,
            message: source.to_string(),
            dependency: None,
            status_code: None,
            source: Some(source),
        }
    }

    /// Classifies an HTTP status code the way the policy table expects.
    #[must_use]
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let kind = match status_code {
            401 | 403 => ErrorKind::AuthFailure,
            404 => ErrorKind::NotFound,
            400 | 422 => ErrorKind::InvalidInput,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::Transient,
            _ => ErrorKind::Unexpected,
        };
        Self::new(kind, message).with_status(status_code)
    }

    /// Sets the status code.
    #[must_use]
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Sets the dependency name.
    #[must_use]
    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }
}

fn dependency_prefix(dependency: &Option<String>) -> String {
    dependency
        .as_deref()
        .map(|d| format!("[{d}] "))
        .unwrap_or_default()
}

/// Error returned when a breaker rejects a call without attempting it.
#[derive(Debug, Clone, Error)]
#[error("Circuit '{dependency}' is open; call rejected without attempt")]
pub struct CircuitOpenError {
    /// The dependency whose circuit is open.
    pub dependency: String,
    /// Time left before a trial call will be admitted.
    pub retry_after: Option<Duration>,
}

/// Error returned when an operation exceeds its deadline.
#[derive(Debug, Clone, Error)]
#[error("Operation '{operation}' timed out after {}ms", after.as_millis())]
pub struct TimeoutError {
    /// The operation that timed out.
    pub operation: String,
    /// The deadline that elapsed.
    pub after: Duration,
    /// True when a whole polling session ran out, not a single attempt.
    pub polling_session: bool,
}

impl TimeoutError {
    /// Creates a timeout error for a single attempt.
    #[must_use]
    pub fn new(operation: impl Into<String>, after: Duration) -> Self {
        Self {
            operation: operation.into(),
            after,
            polling_session: false,
        }
    }

    /// Creates a timeout error for an expired polling session.
    #[must_use]
    pub fn polling(operation: impl Into<String>, after: Duration) -> Self {
        Self {
            operation: operation.into(),
            after,
            polling_session: true,
        }
    }
}

/// Error returned when an identity already has a workflow running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("A workflow is already in progress for '{identity}'")]
pub struct BusyError {
    /// The busy identity.
    pub identity: String,
}

/// Result type alias for reelflow operations.
pub type Result<T> = std::result::Result<T, ReelflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());

        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::AuthFailure.is_retryable());
        assert!(!ErrorKind::QuotaExceeded.is_retryable());
        assert!(!ErrorKind::InvalidInput.is_retryable());
        assert!(!ErrorKind::Unexpected.is_retryable());
        assert!(!ErrorKind::CircuitOpen.is_retryable());
        assert!(!ErrorKind::TimedOut.is_retryable());
    }

    #[test]
    fn test_kind_of_wrapped_errors() {
        let err = ReelflowError::from(CollaboratorError::rate_limited("slow down"));
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.is_retryable());

        let err = ReelflowError::from(TimeoutError::new("fetch", Duration::from_secs(1)));
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err = ReelflowError::from(TimeoutError::polling("poll", Duration::from_secs(30)));
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_status() {
        assert_eq!(CollaboratorError::from_status(429, "x").kind, ErrorKind::RateLimited);
        assert_eq!(CollaboratorError::from_status(503, "x").kind, ErrorKind::Transient);
        assert_eq!(CollaboratorError::from_status(404, "x").kind, ErrorKind::NotFound);
        assert_eq!(CollaboratorError::from_status(401, "x").kind, ErrorKind::AuthFailure);
        assert_eq!(CollaboratorError::from_status(418, "x").kind, ErrorKind::Unexpected);
    }

    #[test]
    fn test_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let err = ReelflowError::from(
            CollaboratorError::transient("fetch failed")
                .with_dependency("content")
                .with_source(anyhow::Error::new(io)),
        );

        let chain = err.cause_chain();
        assert_eq!(chain.len(), 2);
        assert!(chain[0].contains("[content] fetch failed"));
        assert!(chain[1].contains("connection reset"));
    }

    #[test]
    fn test_error_display() {
        let err = BusyError {
            identity: "user-1".to_string(),
        };
        assert!(err.to_string().contains("user-1"));

        let err = CircuitOpenError {
            dependency: "media".to_string(),
            retry_after: None,
        };
        assert!(err.to_string().contains("media"));
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::QuotaExceeded).unwrap();
        assert_eq!(json, r#""quota_exceeded""#);
        assert_eq!(ErrorKind::TimedOut.to_string(), "timed_out");
    }
}
