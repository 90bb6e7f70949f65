//! Declared resilience policy for one stage.

use crate::errors::ConfigurationError;
use crate::resilience::{BreakerConfig, RetryConfig, TimeoutGuard};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry, breaker and deadline settings for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePolicy {
    /// Retry loop configuration.
    pub retry: RetryConfig,
    /// Circuit breaker for the stage's dependency.
    pub breaker: BreakerConfig,
    /// Deadline for a single attempt, in milliseconds.
    pub attempt_timeout_ms: u64,
    /// Render jobs that may be submitted for one workflow.
    ///
    /// Only meaningful for produce-media; 1 means a failed job is final.
    pub max_job_submissions: u32,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            attempt_timeout_ms: TimeoutGuard::DEFAULT.as_millis() as u64,
            max_job_submissions: 1,
        }
    }
}

impl StagePolicy {
    /// Document fetching: cheap, idempotent reads.
    #[must_use]
    pub fn fetch() -> Self {
        Self {
            retry: RetryConfig::default(),
            attempt_timeout_ms: TimeoutGuard::DEFAULT.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Script generation: slower model calls.
    #[must_use]
    pub fn script() -> Self {
        Self {
            attempt_timeout_ms: 120_000,
            ..Self::default()
        }
    }

    /// Render job submission.
    #[must_use]
    pub fn media() -> Self {
        Self {
            breaker: BreakerConfig::new(3, Duration::from_secs(120)),
            ..Self::default()
        }
    }

    /// Publishing: uploads are large and quota is scarce.
    #[must_use]
    pub fn publish() -> Self {
        Self {
            retry: RetryConfig::conservative(),
            breaker: BreakerConfig::new(3, Duration::from_secs(300)),
            attempt_timeout_ms: 600_000,
            ..Self::default()
        }
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the breaker configuration.
    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Sets the per-attempt deadline.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets how many render jobs may be submitted.
    #[must_use]
    pub fn with_max_job_submissions(mut self, submissions: u32) -> Self {
        self.max_job_submissions = submissions;
        self
    }

    /// Returns the per-attempt timeout guard.
    #[must_use]
    pub fn attempt_guard(&self) -> TimeoutGuard {
        TimeoutGuard::from_millis(self.attempt_timeout_ms)
    }

    /// Validates the policy; `section` prefixes field names in errors.
    pub fn validate(&self, section: &str) -> Result<(), ConfigurationError> {
        self.retry
            .validate()
            .map_err(|m| ConfigurationError::new(format!("{section}.retry"), m))?;
        self.breaker
            .validate()
            .map_err(|m| ConfigurationError::new(format!("{section}.breaker"), m))?;
        if self.attempt_timeout_ms == 0 {
            return Err(ConfigurationError::new(
                format!("{section}.attempt_timeout_ms"),
                "must be positive",
            ));
        }
        if self.max_job_submissions < 1 {
            return Err(ConfigurationError::new(
                format!("{section}.max_job_submissions"),
                "must be >= 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for (name, policy) in [
            ("fetch", StagePolicy::fetch()),
            ("script", StagePolicy::script()),
            ("media", StagePolicy::media()),
            ("publish", StagePolicy::publish()),
        ] {
            assert!(policy.validate(name).is_ok(), "{name} preset invalid");
        }
        assert_eq!(StagePolicy::publish().retry.max_attempts, 2);
        assert_eq!(StagePolicy::media().max_job_submissions, 1);
    }

    #[test]
    fn test_validation_names_the_field() {
        let err = StagePolicy::default()
            .with_retry(RetryConfig::new().with_max_attempts(0))
            .validate("fetch")
            .unwrap_err();
        assert_eq!(err.field, "fetch.retry");

        let err = StagePolicy::default()
            .with_attempt_timeout(Duration::ZERO)
            .validate("publish")
            .unwrap_err();
        assert_eq!(err.field, "publish.attempt_timeout_ms");

        let err = StagePolicy::media()
            .with_max_job_submissions(0)
            .validate("media")
            .unwrap_err();
        assert_eq!(err.field, "media.max_job_submissions");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let policy: StagePolicy =
            serde_json::from_str(r#"{"retry": {"max_attempts": 5}, "attempt_timeout_ms": 1000}"#).unwrap();
        assert_eq!(policy.retry.max_attempts, 5);
        assert_eq!(policy.retry.initial_delay_ms, 1000);
        assert_eq!(policy.breaker, BreakerConfig::default());
        assert_eq!(policy.attempt_guard().after(), Duration::from_secs(1));
    }
}
