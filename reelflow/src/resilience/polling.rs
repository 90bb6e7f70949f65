//! Polling state machine for long-running remote jobs.
//!
//! # States
//! ```text
//! Started -> Polling -> Succeeded
//!                    -> Failed
//!                    -> TimedOut
//!                    -> Cancelled
//! ```
//!
//! [`PollingMachine`] holds the transition logic and never sleeps, so it can be
//! tested by feeding it query outcomes and elapsed times. [`PollingWaiter`]
//! drives it on tokio time.

use super::timeout::TimeoutGuard;
use crate::cancellation::CancellationToken;
use crate::errors::{ErrorKind, ReelflowError, TimeoutError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Longest overall deadline a polling session may be configured with.
pub const MAX_DEADLINE_SECS: u64 = 7200;

/// Handle to a submitted remote job.
///
/// Not `Clone`: the waiter that consumes it is the only one polling the job.
#[derive(Debug, PartialEq, Eq)]
pub struct JobHandle {
    id: String,
    submitted_at: DateTime<Utc>,
}

impl JobHandle {
    /// Creates a handle for a job submitted now.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            submitted_at: Utc::now(),
        }
    }

    /// Returns the opaque remote job id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns when the job was submitted.
    #[must_use]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

/// Coarse phase of a remote job, mapped from the remote vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemotePhase {
    /// Still rendering, or a state we don't recognise.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with a failure.
    Failed,
}

impl RemotePhase {
    /// Maps a remote status word to a phase.
    ///
    /// Unknown words are treated as still running.
    #[must_use]
    pub fn from_vocabulary(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "completed" | "succeeded" | "done" => Self::Succeeded,
            "failed" | "error" | "cancelled" => Self::Failed,
            _ => Self::Running,
        }
    }
}

impl fmt::Display for RemotePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Status reported by one query of a remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus<T> {
    /// The job has not finished.
    Running,
    /// The job finished and produced a result.
    Succeeded(T),
    /// The job finished in a failed state.
    Failed(String),
}

impl<T> JobStatus<T> {
    /// Builds a status from a remote status word.
    ///
    /// A success word without a result is still running; a failure word
    /// without a message gets a generic one.
    #[must_use]
    pub fn from_remote(status: &str, result: Option<T>, message: Option<String>) -> Self {
        match (RemotePhase::from_vocabulary(status), result) {
            (RemotePhase::Succeeded, Some(result)) => Self::Succeeded(result),
            (RemotePhase::Failed, _) => {
                Self::Failed(message.unwrap_or_else(|| format!("remote job reported '{status}'")))
            }
            _ => Self::Running,
        }
    }

    /// Returns the phase of this status.
    #[must_use]
    pub fn phase(&self) -> RemotePhase {
        match self {
            Self::Running => RemotePhase::Running,
            Self::Succeeded(_) => RemotePhase::Succeeded,
            Self::Failed(_) => RemotePhase::Failed,
        }
    }
}

/// Source of job status for a [`PollingWaiter`].
#[async_trait]
pub trait StatusQuery<T: Send>: Send + Sync {
    /// Queries the current status of `handle`.
    async fn query(&self, handle: &JobHandle) -> Result<JobStatus<T>, ReelflowError>;
}

/// Polling cadence and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// First interval between queries, in milliseconds.
    pub initial_interval_ms: u64,
    /// Growth factor applied after each running query.
    pub multiplier: f64,
    /// Interval cap, in milliseconds.
    pub max_interval_ms: u64,
    /// Overall deadline for the session, in seconds.
    pub deadline_secs: u64,
    /// Deadline for a single status query, in milliseconds.
    pub query_timeout_ms: u64,
    /// Consecutive failed queries tolerated before the session fails.
    pub max_query_errors: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 10_000,
            multiplier: 1.5,
            max_interval_ms: 60_000,
            deadline_secs: 1800,
            query_timeout_ms: 30_000,
            max_query_errors: 3,
        }
    }
}

impl PollingConfig {
    /// Returns the overall deadline.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Returns the per-query deadline.
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Sets the overall deadline.
    ///
    /// The deadline is kept in whole seconds; a sub-second remainder rounds
    /// up, so the session never gets less time than asked for.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        let whole = deadline.as_secs();
        self.deadline_secs = if deadline.subsec_nanos() > 0 {
            whole.saturating_add(1)
        } else {
            whole
        };
        self
    }

    /// Sets the initial and maximum intervals.
    #[must_use]
    pub fn with_intervals(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_interval_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX);
        self.max_interval_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_interval_ms == 0 {
            return Err("initial_interval_ms must be positive".to_string());
        }
        if !(self.multiplier >= 1.0) {
            return Err("multiplier must be >= 1".to_string());
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err("max_interval_ms must be >= initial_interval_ms".to_string());
        }
        if self.deadline_secs == 0 || self.deadline_secs > MAX_DEADLINE_SECS {
            return Err(format!("deadline_secs must be within 1..={MAX_DEADLINE_SECS}"));
        }
        if self.query_timeout_ms == 0 {
            return Err("query_timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

/// State of a polling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    /// No query made yet.
    Started,
    /// At least one query made, job not finished.
    Polling,
    /// The job succeeded.
    Succeeded,
    /// The job failed, or queries kept failing.
    Failed,
    /// The overall deadline passed.
    TimedOut,
    /// The session was cancelled.
    Cancelled,
}

impl PollState {
    /// Returns true if no further transition can happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Started | Self::Polling)
    }
}

/// What the driver should do next.
#[derive(Debug)]
pub enum PollAction<T> {
    /// Sleep, then query again.
    Sleep(Duration),
    /// The session is over.
    Finish(Result<T, ReelflowError>),
}

/// Pure polling transition logic.
#[derive(Debug)]
pub struct PollingMachine {
    job_id: String,
    config: PollingConfig,
    state: PollState,
    queries: u32,
    consecutive_errors: u32,
    next_interval: Duration,
}

impl PollingMachine {
    /// Creates a machine in the Started state.
    #[must_use]
    pub fn new(job_id: impl Into<String>, config: PollingConfig) -> Self {
        let next_interval = Duration::from_millis(config.initial_interval_ms);
        Self {
            job_id: job_id.into(),
            config,
            state: PollState::Started,
            queries: 0,
            consecutive_errors: 0,
            next_interval,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> PollState {
        self.state
    }

    /// Returns the number of queries observed.
    #[must_use]
    pub fn queries(&self) -> u32 {
        self.queries
    }

    /// Feeds one query outcome, observed `elapsed` after the session started.
    pub fn observe<T>(
        &mut self,
        outcome: Result<JobStatus<T>, ReelflowError>,
        elapsed: Duration,
    ) -> PollAction<T> {
        self.queries += 1;
        self.state = PollState::Polling;

        match outcome {
            Ok(JobStatus::Succeeded(result)) => {
                self.state = PollState::Succeeded;
                PollAction::Finish(Ok(result))
            }
            Ok(JobStatus::Failed(message)) => {
                self.state = PollState::Failed;
                PollAction::Finish(Err(ReelflowError::JobFailed {
                    job_id: self.job_id.clone(),
                    message,
                }))
            }
            Ok(JobStatus::Running) => {
                self.consecutive_errors = 0;
                self.still_running(elapsed)
            }
            Err(error) if error.kind() == ErrorKind::Cancelled => {
                self.state = PollState::Cancelled;
                PollAction::Finish(Err(error))
            }
            Err(error) if !error.is_retryable() => {
                self.state = PollState::Failed;
                PollAction::Finish(Err(error))
            }
            Err(error) => {
                self.consecutive_errors += 1;
                if self.consecutive_errors > self.config.max_query_errors {
                    self.state = PollState::Failed;
                    return PollAction::Finish(Err(error));
                }
                warn!(
                    job_id = %self.job_id,
                    consecutive_errors = self.consecutive_errors,
                    error = %error,
                    "Status query failed, treating job as still running"
                );
                self.still_running(elapsed)
            }
        }
    }

    /// Moves the machine to Cancelled.
    pub fn cancel<T>(&mut self, reason: impl Into<String>) -> PollAction<T> {
        self.state = PollState::Cancelled;
        PollAction::Finish(Err(ReelflowError::Cancelled(reason.into())))
    }

    fn still_running<T>(&mut self, elapsed: Duration) -> PollAction<T> {
        let deadline = self.config.deadline();
        if elapsed >= deadline {
            self.state = PollState::TimedOut;
            return PollAction::Finish(Err(TimeoutError::polling(
                format!("poll job {}", self.job_id),
                deadline,
            )
            .into()));
        }

        let sleep = self.next_interval.min(deadline - elapsed);
        let grown = self.next_interval.as_secs_f64() * self.config.multiplier;
        let cap = Duration::from_millis(self.config.max_interval_ms);
        self.next_interval = Duration::from_secs_f64(grown.min(cap.as_secs_f64()));
        PollAction::Sleep(sleep)
    }
}

/// One poll observation, reported to the tick callback.
#[derive(Debug, Clone, Copy)]
pub struct PollTick<'a> {
    /// The remote job id.
    pub job_id: &'a str,
    /// Query number, 1-based.
    pub attempt: u32,
    /// Time since the session started.
    pub elapsed: Duration,
    /// Phase reported by the query; failed queries report Running.
    pub phase: RemotePhase,
}

/// Final result of a polling session.
#[derive(Debug)]
pub struct PollReport<T> {
    /// The job result or the reason the session ended without one.
    pub result: Result<T, ReelflowError>,
    /// Terminal state of the machine.
    pub state: PollState,
    /// Queries made.
    pub queries: u32,
    /// Total session time.
    pub elapsed: Duration,
}

/// Drives a [`PollingMachine`] against a [`StatusQuery`].
#[derive(Debug, Clone, Default)]
pub struct PollingWaiter {
    config: PollingConfig,
}

impl PollingWaiter {
    /// Creates a waiter.
    #[must_use]
    pub fn new(config: PollingConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Polls `handle` until it reaches a terminal state.
    ///
    /// The first query is immediate. Each query runs under its own
    /// [`TimeoutGuard`]; queries and sleeps are interrupted by `cancel`.
    pub async fn wait<T, S, K>(
        &self,
        handle: JobHandle,
        source: &S,
        cancel: &CancellationToken,
        mut on_tick: K,
    ) -> PollReport<T>
    where
        T: Send,
        S: StatusQuery<T> + ?Sized,
        K: FnMut(PollTick<'_>),
    {
        let started = Instant::now();
        let query_guard = TimeoutGuard::new(self.config.query_timeout());
        let mut machine = PollingMachine::new(handle.id(), self.config.clone());
        info!(job_id = handle.id(), deadline_secs = self.config.deadline_secs, "Polling job");

        let result = loop {
            if cancel.is_cancelled() {
                break Self::finish(machine.cancel(cancel.reason().unwrap_or_default()));
            }

            let outcome = tokio::select! {
                outcome = query_guard.run("job status query", source.query(&handle)) => outcome,
                () = cancel.cancelled() => {
                    break Self::finish(machine.cancel(cancel.reason().unwrap_or_default()));
                }
            };

            let phase = match &outcome {
                Ok(status) => status.phase(),
                Err(_) => RemotePhase::Running,
            };
            let action = machine.observe(outcome, started.elapsed());
            on_tick(PollTick {
                job_id: handle.id(),
                attempt: machine.queries(),
                elapsed: started.elapsed(),
                phase,
            });

            match action {
                PollAction::Finish(result) => break result,
                PollAction::Sleep(delay) => {
                    debug!(
                        job_id = handle.id(),
                        attempt = machine.queries(),
                        delay_ms = delay.as_millis() as u64,
                        "Job still running"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => {
                            break Self::finish(machine.cancel(cancel.reason().unwrap_or_default()));
                        }
                    }
                }
            }
        };

        info!(
            job_id = handle.id(),
            state = ?machine.state(),
            queries = machine.queries(),
            "Polling finished"
        );
        PollReport {
            result,
            state: machine.state(),
            queries: machine.queries(),
            elapsed: started.elapsed(),
        }
    }

    fn finish<T>(action: PollAction<T>) -> Result<T, ReelflowError> {
        match action {
            PollAction::Finish(result) => result,
            PollAction::Sleep(_) => Err(ReelflowError::Internal(
                "polling machine did not finish".to_string(),
            )),
        }
    }
}
