//! Retry policy with exponential backoff and jitter.
//!
//! The policy itself is stateless: [`RetryPolicy::decide`] looks only at the
//! error and the number of attempts already made. The caller owns the attempt
//! counter; [`with_retry`] is the standard loop that drives it.

use crate::cancellation::CancellationToken;
use crate::errors::{ErrorKind, ReelflowError};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Jitter strategy to prevent synchronized retries across workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
}

impl JitterStrategy {
    /// Applies jitter to a delay.
    #[must_use]
    pub fn apply(self, delay: Duration) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return delay;
        }

        let mut rng = rand::thread_rng();
        match self {
            Self::None => delay,
            Self::Full => Duration::from_millis(rng.gen_range(0..=millis)),
            Self::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + rng.gen_range(0..=millis - half))
            }
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the initial one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor applied per failed attempt.
    pub multiplier: f64,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
    /// Optional budget for the whole retry loop, in milliseconds.
    pub max_elapsed_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: JitterStrategy::Full,
            max_elapsed_ms: None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// More attempts with shorter delays, for cheap idempotent calls.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            ..Self::default()
        }
    }

    /// Fewer attempts, for calls with side effects or tight quotas.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            initial_delay_ms: 2000,
            max_delay_ms: 10_000,
            ..Self::default()
        }
    }

    /// A single attempt, no retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay_ms(mut self, delay: u64) -> Self {
        self.initial_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the total time budget for the loop.
    #[must_use]
    pub fn with_max_elapsed_ms(mut self, budget: u64) -> Self {
        self.max_elapsed_ms = Some(budget);
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 1 {
            return Err("max_attempts must be >= 1".to_string());
        }
        if !(self.multiplier >= 1.0) {
            return Err("multiplier must be >= 1".to_string());
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err("max_delay_ms must be >= initial_delay_ms".to_string());
        }
        if self.max_elapsed_ms == Some(0) {
            return Err("max_elapsed_ms must be positive when provided".to_string());
        }
        Ok(())
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more attempts, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

impl RetryDecision {
    /// Returns true if the decision is to retry.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Retry(_))
    }
}

/// Maps an error to retryable or terminal.
pub type Classifier = Arc<dyn Fn(&ReelflowError) -> bool + Send + Sync>;

/// Pure retry decision function.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    classifier: Classifier,
}

impl RetryPolicy {
    /// Creates a policy using the default policy table.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            classifier: Arc::new(ReelflowError::is_retryable),
        }
    }

    /// Replaces the classifier.
    #[must_use]
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&ReelflowError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns true if the classifier allows retrying this error.
    #[must_use]
    pub fn is_retryable(&self, error: &ReelflowError) -> bool {
        (self.classifier)(error)
    }

    /// Backoff before jitter after `attempt` failed attempts (1-based).
    ///
    /// `min(max_delay, initial_delay * multiplier^(attempt - 1))`
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent);
        let capped = raw.min(self.config.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Decides whether to retry after `attempt` has failed with `error`.
    #[must_use]
    pub fn decide(&self, error: &ReelflowError, attempt: u32) -> RetryDecision {
        if !self.is_retryable(error) {
            return RetryDecision::NotRetryable;
        }
        if attempt >= self.config.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.config.jitter.apply(self.base_delay(attempt)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Outcome of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The attempt succeeded.
    Success,
    /// The attempt failed.
    Failure,
}

/// Record of one attempt of an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// The operation being attempted.
    pub operation: String,
    /// Attempt number, 1-based.
    pub number: u32,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// How it ended.
    pub outcome: AttemptOutcome,
    /// Classification of the failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Final result of a retry loop plus its attempt log.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The last attempt's result.
    pub result: Result<T, ReelflowError>,
    /// Every attempt made.
    pub attempts: Vec<Attempt>,
}

impl<T> RetryOutcome<T> {
    /// Number of attempts made.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// Number of retries, i.e. attempts after the first.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.attempt_count().saturating_sub(1)
    }
}

/// Information passed to the retry observer before each backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryNotice<'a> {
    /// The operation being retried.
    pub operation: &'a str,
    /// The attempt that just failed.
    pub failed_attempt: u32,
    /// The backoff about to be slept.
    pub delay: Duration,
    /// The error that caused the retry.
    pub error: &'a ReelflowError,
}

/// Executes an operation with retry logic.
///
/// Each attempt runs `operation(attempt_number)`. Between attempts the loop
/// sleeps the policy's backoff; cancellation interrupts the sleep and ends the
/// loop with [`ReelflowError::Cancelled`].
pub async fn with_retry<T, F, Fut, N>(
    policy: &RetryPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
    mut on_retry: N,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ReelflowError>>,
    N: FnMut(RetryNotice<'_>),
{
    let started = Instant::now();
    let budget = policy.config().max_elapsed_ms.map(Duration::from_millis);
    let mut attempts = Vec::new();
    let mut number = 0;

    loop {
        if cancel.is_cancelled() {
            return RetryOutcome {
                result: Err(ReelflowError::Cancelled(cancel.reason().unwrap_or_default())),
                attempts,
            };
        }

        number += 1;
        let started_at = Utc::now();
        let result = operation(number).await;

        let error = match result {
            Ok(value) => {
                attempts.push(Attempt {
                    operation: operation_name.to_string(),
                    number,
                    started_at,
                    outcome: AttemptOutcome::Success,
                    error_kind: None,
                });
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(error) => error,
        };

        attempts.push(Attempt {
            operation: operation_name.to_string(),
            number,
            started_at,
            outcome: AttemptOutcome::Failure,
            error_kind: Some(error.kind()),
        });

        let delay = match policy.decide(&error, number) {
            RetryDecision::Retry(delay) => delay,
            RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                };
            }
        };

        if let Some(budget) = budget {
            if started.elapsed() + delay >= budget {
                tracing::warn!(
                    operation = operation_name,
                    attempt = number,
                    budget_ms = budget.as_millis() as u64,
                    "Retry budget exhausted"
                );
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                };
            }
        }

        tracing::warn!(
            operation = operation_name,
            attempt = number,
            max_attempts = policy.config().max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying after error"
        );
        on_retry(RetryNotice {
            operation: operation_name,
            failed_attempt: number,
            delay,
            error: &error,
        });

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => {
                return RetryOutcome {
                    result: Err(ReelflowError::Cancelled(cancel.reason().unwrap_or_default())),
                    attempts,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CollaboratorError, ValidationError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> ReelflowError {
        CollaboratorError::transient("503").into()
    }

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::new()
                .with_max_attempts(max_attempts)
                .with_initial_delay_ms(100)
                .with_max_delay_ms(1000)
                .with_jitter(JitterStrategy::None),
        )
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_config_presets() {
        assert_eq!(RetryConfig::aggressive().max_attempts, 5);
        assert_eq!(RetryConfig::conservative().max_attempts, 2);
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }

    #[test]
    fn test_retry_config_validation() {
        assert!(RetryConfig::new().with_max_attempts(0).validate().is_err());
        assert!(RetryConfig::new().with_multiplier(0.5).validate().is_err());
        assert!(RetryConfig::new().with_multiplier(f64::NAN).validate().is_err());
        assert!(RetryConfig::new()
            .with_initial_delay_ms(500)
            .with_max_delay_ms(100)
            .validate()
            .is_err());
    }

    #[test]
    fn test_base_delay_exponential() {
        let policy = no_jitter(10);
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay(4), Duration::from_millis(800));
        assert_eq!(policy.base_delay(5), Duration::from_millis(1000));
        assert_eq!(policy.base_delay(50), Duration::from_millis(1000));
    }

    #[test]
    fn test_base_delay_monotonic_up_to_cap() {
        for multiplier in [1.0, 1.5, 2.0, 3.0] {
            let policy = RetryPolicy::new(
                RetryConfig::new()
                    .with_initial_delay_ms(250)
                    .with_max_delay_ms(20_000)
                    .with_multiplier(multiplier),
            );
            let mut previous = Duration::ZERO;
            for attempt in 1..40 {
                let delay = policy.base_delay(attempt);
                assert!(delay >= previous, "delay shrank at attempt {attempt}");
                assert!(delay <= Duration::from_millis(20_000));
                previous = delay;
            }
        }
    }

    #[test]
    fn test_decide_refuses_at_max_attempts() {
        let policy = no_jitter(3);
        let err = transient();

        assert_eq!(policy.decide(&err, 1), RetryDecision::Retry(Duration::from_millis(100)));
        assert_eq!(policy.decide(&err, 2), RetryDecision::Retry(Duration::from_millis(200)));
        assert_eq!(policy.decide(&err, 3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(&err, 4), RetryDecision::GiveUp);
    }

    #[test]
    fn test_decide_not_retryable() {
        let policy = no_jitter(5);
        let err = ReelflowError::from(ValidationError::new("identifier", "empty"));
        assert_eq!(policy.decide(&err, 1), RetryDecision::NotRetryable);

        let err = ReelflowError::from(CollaboratorError::quota_exceeded("daily quota"));
        assert_eq!(policy.decide(&err, 1), RetryDecision::NotRetryable);
    }

    #[test]
    fn test_custom_classifier() {
        let policy = no_jitter(3).with_classifier(|e| e.kind() == ErrorKind::Publish);
        assert!(policy.decide(&CollaboratorError::publish("x").into(), 1).should_retry());
        assert!(!policy.decide(&transient(), 1).should_retry());
    }

    #[test]
    fn test_full_jitter_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..100 {
            assert!(JitterStrategy::Full.apply(delay) <= delay);
            let equal = JitterStrategy::Equal.apply(delay);
            assert!(equal >= Duration::from_millis(50) && equal <= delay);
        }
        assert_eq!(JitterStrategy::None.apply(delay), delay);
        assert_eq!(JitterStrategy::Full.apply(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_success_after_failures() {
        let policy = no_jitter(5);
        let token = CancellationToken::new();
        let mut notices = Vec::new();

        let outcome = with_retry(
            &policy,
            "fetch",
            &token,
            |n| notices.push((n.failed_attempt, n.delay)),
            |attempt| async move {
                if attempt < 3 {
                    Err(transient())
                } else {
                    Ok(42)
                }
            },
        )
        .await;

        assert_eq!(outcome.result.as_ref().unwrap(), &42);
        assert_eq!(outcome.attempt_count(), 3);
        assert_eq!(outcome.retries(), 2);
        assert_eq!(outcome.attempts[2].outcome, AttemptOutcome::Success);
        assert_eq!(outcome.attempts[0].error_kind, Some(ErrorKind::Transient));
        assert_eq!(
            notices,
            vec![(1, Duration::from_millis(100)), (2, Duration::from_millis(200))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_exhausts_attempts() {
        let policy = no_jitter(3);
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = with_retry(&policy, "fetch", &token, |_| {}, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;

        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_terminal_error_not_retried() {
        let policy = no_jitter(5);
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = with_retry(&policy, "fetch", &token, |_| {}, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CollaboratorError::not_found("gone").into()) }
        })
        .await;

        assert_eq!(outcome.result.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_respects_budget() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_max_attempts(10)
                .with_initial_delay_ms(1000)
                .with_jitter(JitterStrategy::None)
                .with_max_elapsed_ms(2500),
        );
        let token = CancellationToken::new();

        let outcome: RetryOutcome<()> =
            with_retry(&policy, "fetch", &token, |_| {}, |_| async { Err(transient()) }).await;

        // Sleeps of 1s and 2s would cross the 2.5s budget after the second attempt.
        assert_eq!(outcome.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_cancelled_during_backoff() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_max_attempts(5)
                .with_initial_delay_ms(60_000)
                .with_max_delay_ms(60_000)
                .with_jitter(JitterStrategy::None),
        );
        let token = Arc::new(CancellationToken::new());
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel("user request");
        });

        let started = Instant::now();
        let outcome: RetryOutcome<()> =
            with_retry(&policy, "fetch", &token, |_| {}, |_| async { Err(transient()) }).await;

        assert_eq!(outcome.result.as_ref().unwrap_err().kind(), ErrorKind::Cancelled);
        assert_eq!(outcome.attempt_count(), 1);
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
