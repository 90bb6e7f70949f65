//! Executes one stage under its declared policy.

use super::policy::StagePolicy;
use crate::cancellation::CancellationToken;
use crate::core::{FailureRecord, StageKind, StageResult};
use crate::errors::ReelflowError;
use crate::observability::{stage_span, SpanTimer};
use crate::resilience::{
    with_retry, BreakerPermit, BreakerRegistry, CircuitBreaker, RetryNotice, RetryOutcome,
    RetryPolicy, TimeoutGuard,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, Instrument};

/// Result of running a stage.
#[derive(Debug)]
pub struct StageOutcome<T> {
    /// The stage value or its failure.
    pub result: StageResult<T>,
    /// Attempts made, 0 if the breaker rejected the call.
    pub attempts: u32,
    /// Wall time spent in the stage.
    pub duration_ms: f64,
}

/// Wraps a stage's operation: breaker admission, then the retry loop,
/// then a timeout around each attempt.
#[derive(Debug, Clone)]
pub struct StageRunner {
    stage: StageKind,
    retry: RetryPolicy,
    attempt_guard: TimeoutGuard,
    breaker: Arc<CircuitBreaker>,
}

impl StageRunner {
    /// Creates a runner, taking the stage's breaker from `registry`.
    #[must_use]
    pub fn new(stage: StageKind, policy: &StagePolicy, registry: &BreakerRegistry) -> Self {
        let dependency = stage.dependency().unwrap_or_else(|| stage.name());
        Self {
            stage,
            retry: RetryPolicy::new(policy.retry.clone()),
            attempt_guard: policy.attempt_guard(),
            breaker: registry.get_or_create(dependency, &policy.breaker),
        }
    }

    /// Returns the stage.
    #[must_use]
    pub fn stage(&self) -> StageKind {
        self.stage
    }

    /// Returns the breaker guarding the stage's dependency.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Asks the breaker for one admission.
    pub fn admit(&self) -> Result<BreakerPermit, ReelflowError> {
        Ok(self.breaker.try_acquire()?)
    }

    /// Runs the retry loop with a per-attempt timeout, without breaker
    /// admission. Callers holding a permit use this for multi-step stages.
    ///
    /// Cancellation abandons an in-flight attempt as well as a backoff.
    pub async fn attempts<T, F, Fut, N>(
        &self,
        cancel: &CancellationToken,
        on_retry: N,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ReelflowError>>,
        N: FnMut(RetryNotice<'_>),
    {
        let name = self.stage.name();
        with_retry(&self.retry, name, cancel, on_retry, |attempt| {
            debug!(stage = name, attempt, "Stage attempt");
            let attempt = self.attempt_guard.run(name, operation(attempt));
            async move {
                tokio::select! {
                    result = attempt => result,
                    () = cancel.cancelled() => {
                        Err(ReelflowError::Cancelled(cancel.reason().unwrap_or_default()))
                    }
                }
            }
        })
        .await
    }

    /// Runs a single-step stage end to end.
    pub async fn run<T, F, Fut, N>(
        &self,
        cancel: &CancellationToken,
        on_retry: N,
        operation: F,
    ) -> StageOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ReelflowError>>,
        N: FnMut(RetryNotice<'_>),
    {
        let span = stage_span(self.stage.name(), self.stage.dependency());
        async move {
            let timer = SpanTimer::start(self.stage.name());
            let permit = match self.admit() {
                Ok(permit) => permit,
                Err(error) => {
                    return StageOutcome {
                        result: Err(self.failure(&error, 0)),
                        attempts: 0,
                        duration_ms: timer.finish(),
                    };
                }
            };

            let outcome = self.attempts(cancel, on_retry, operation).await;
            permit.record(&outcome.result);

            let attempts = outcome.attempt_count();
            StageOutcome {
                result: outcome.result.map_err(|e| self.failure(&e, attempts)),
                attempts,
                duration_ms: timer.finish(),
            }
        }
        .instrument(span)
        .await
    }

    /// Builds this stage's failure record.
    #[must_use]
    pub fn failure(&self, error: &ReelflowError, attempts: u32) -> FailureRecord {
        FailureRecord::from_error(self.stage, error, attempts)
    }
}
