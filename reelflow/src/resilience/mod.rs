//! Resilience primitives: retry, circuit breaking, deadlines and polling.
//!
//! Stage calls compose them outermost first:
//! breaker admission -> retry loop -> per-attempt timeout.

mod breaker;
mod polling;
mod retry;
mod timeout;

pub use breaker::{
    BreakerConfig, BreakerPermit, BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitState,
};
pub use polling::{
    JobHandle, JobStatus, PollAction, PollReport, PollState, PollTick, PollingConfig,
    PollingMachine, PollingWaiter, RemotePhase, StatusQuery, MAX_DEADLINE_SECS,
};
pub use retry::{
    with_retry, Attempt, AttemptOutcome, Classifier, JitterStrategy, RetryConfig, RetryDecision,
    RetryNotice, RetryOutcome, RetryPolicy,
};
pub use timeout::TimeoutGuard;
