//! Per-dependency circuit breaker.
//!
//! # States
//! - Closed: calls pass through, consecutive failures are counted
//! - Open: dependency presumed down, calls rejected without an attempt
//! - HalfOpen: a single trial call decides between Closed and Open
//!
//! ```text
//! Closed   -> Open     : consecutive_failures >= failure_threshold
//! Open     -> HalfOpen : now - opened_at >= recovery_timeout (next caller is the trial)
//! HalfOpen -> Closed   : trial succeeds
//! HalfOpen -> Open     : trial fails (opened_at = now)
//! ```
//!
//! Transitions for one dependency are serialized by the breaker's mutex.
//! [`CircuitBreaker::state`] reads an atomic snapshot without locking.

use crate::errors::{CircuitOpenError, ErrorKind, ReelflowError};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls allowed.
    Closed,
    /// Failures exceeded the threshold, calls rejected.
    Open,
    /// Testing whether the dependency recovered.
    HalfOpen,
}

impl CircuitState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial, in milliseconds.
    pub recovery_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
        }
    }
}

impl BreakerConfig {
    /// Creates a breaker config.
    #[must_use]
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout_ms: u64::try_from(recovery_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns the recovery timeout.
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold < 1 {
            return Err("failure_threshold must be >= 1".to_string());
        }
        if self.recovery_timeout_ms == 0 {
            return Err("recovery_timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Dependency name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures counted so far.
    pub consecutive_failures: u32,
    /// How long the circuit has been open, if it is.
    pub open_for: Option<Duration>,
}

/// Health gate in front of one dependency.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    snapshot: AtomicU8,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            snapshot: AtomicU8::new(CircuitState::Closed.to_u8()),
        }
    }

    /// Returns the dependency name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns the last published state without taking the lock.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.snapshot.load(Ordering::Acquire))
    }

    /// Returns a consistent view of the breaker's counters.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            open_for: match inner.state {
                CircuitState::Open => inner.opened_at.map(|at| at.elapsed()),
                _ => None,
            },
        }
    }

    /// Asks for permission to make one call.
    ///
    /// In HalfOpen only the caller that performed the Open -> HalfOpen
    /// transition is admitted; everyone else is rejected until the trial
    /// settles.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, CircuitOpenError> {
        if self.state() == CircuitState::Closed {
            return Ok(BreakerPermit::new(self.clone(), false));
        }

        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(BreakerPermit::new(self.clone(), false)),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map_or(Duration::MAX, |at| at.elapsed());
                let recovery = self.config.recovery_timeout();
                if elapsed >= recovery {
                    inner.trial_in_flight = true;
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    info!(dependency = %self.name, "Circuit entering half-open state");
                    Ok(BreakerPermit::new(self.clone(), true))
                } else {
                    Err(self.rejection(Some(recovery - elapsed)))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(self.rejection(None))
                } else {
                    inner.trial_in_flight = true;
                    Ok(BreakerPermit::new(self.clone(), true))
                }
            }
        }
    }

    /// Runs `operation` through the breaker.
    ///
    /// Rejected calls never invoke `operation`. The outcome is recorded
    /// according to [`ErrorKind::affects_dependency_health`]; a cancelled
    /// call records nothing.
    pub async fn call<T, F, Fut>(self: &Arc<Self>, operation: F) -> Result<T, ReelflowError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ReelflowError>>,
    {
        let permit = self.try_acquire()?;
        let result = operation().await;
        permit.record(&result);
        result
    }

    /// Manually resets the breaker to Closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed);
        info!(dependency = %self.name, "Circuit manually reset");
    }

    fn rejection(&self, retry_after: Option<Duration>) -> CircuitOpenError {
        debug!(dependency = %self.name, "Circuit open, rejecting call");
        CircuitOpenError {
            dependency: self.name.clone(),
            retry_after,
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        inner.state = to;
        self.snapshot.store(to.to_u8(), Ordering::Release);
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen if trial => {
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                self.transition(&mut inner, CircuitState::Closed);
                info!(dependency = %self.name, "Circuit closed after successful trial");
            }
            CircuitState::Closed => inner.consecutive_failures = 0,
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            CircuitState::HalfOpen if trial => {
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                self.transition(&mut inner, CircuitState::Open);
                warn!(dependency = %self.name, "Circuit reopened after failed trial");
            }
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                inner.opened_at = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
                warn!(
                    dependency = %self.name,
                    failures = inner.consecutive_failures,
                    "Circuit opened"
                );
            }
            _ => {}
        }
    }

    fn abandon_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
            debug!(dependency = %self.name, "Half-open trial abandoned");
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Permission to make one call through a breaker.
///
/// Dropping a permit without recording an outcome releases a half-open
/// trial slot without changing state.
#[must_use = "record the call outcome on the permit"]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl BreakerPermit {
    fn new(breaker: Arc<CircuitBreaker>, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Returns true if this permit is the half-open trial.
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Records a successful call.
    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    /// Records a failed call.
    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    /// Records the outcome of a call from its result.
    pub fn record<T>(self, result: &Result<T, ReelflowError>) {
        match result {
            Ok(_) => self.record_success(),
            Err(e) if e.kind() == ErrorKind::Cancelled => drop(self),
            Err(e) if e.kind().affects_dependency_health() => self.record_failure(),
            // The dependency answered; the problem is on our side.
            Err(_) => self.record_success(),
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.abandon_trial();
        }
    }
}

impl fmt::Debug for BreakerPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerPermit")
            .field("dependency", &self.breaker.name)
            .field("trial", &self.trial)
            .finish()
    }
}

/// Registry of breakers keyed by dependency name.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<BreakerRegistry>> = OnceLock::new();

impl BreakerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry.
    pub fn global() -> Arc<Self> {
        GLOBAL_REGISTRY.get_or_init(|| Arc::new(Self::new())).clone()
    }

    /// Returns the breaker for `name`, creating it with `config` if absent.
    ///
    /// An existing breaker keeps its original configuration.
    pub fn get_or_create(&self, name: &str, config: &BreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config.clone())))
            .clone()
    }

    /// Returns the breaker for `name`, if registered.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.value().clone())
    }

    /// Returns the state of every registered breaker.
    #[must_use]
    pub fn states(&self) -> BTreeMap<String, CircuitState> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }

    /// Resets the named breaker. Returns false if it does not exist.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Number of registered breakers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Returns true if no breakers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CollaboratorError, ValidationError};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn breaker(threshold: u32, recovery_secs: u64) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "media",
            BreakerConfig::new(threshold, Duration::from_secs(recovery_secs)),
        ))
    }

    fn fail(b: &Arc<CircuitBreaker>) {
        b.try_acquire().unwrap().record_failure();
    }

    #[test]
    fn test_starts_closed() {
        let b = breaker(3, 60);
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.try_acquire().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(BreakerConfig::default().validate().is_ok());
        assert!(BreakerConfig::new(0, Duration::from_secs(1)).validate().is_err());
        assert!(BreakerConfig::new(1, Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_opens_after_threshold() {
        let b = breaker(3, 60);
        fail(&b);
        fail(&b);
        assert_eq!(b.state(), CircuitState::Closed);
        fail(&b);
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.snapshot().consecutive_failures, 3);
    }

    #[test]
    fn test_success_resets_counter_when_closed() {
        let b = breaker(3, 60);
        fail(&b);
        fail(&b);
        b.try_acquire().unwrap().record_success();
        fail(&b);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_invoking() {
        let b = breaker(2, 60);
        fail(&b);
        fail(&b);

        let calls = AtomicUsize::new(0);
        let result: Result<(), ReelflowError> = b
            .call(|| async {
                calls.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::CircuitOpen);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_admits_exactly_one_trial() {
        let b = breaker(1, 30);
        fail(&b);
        assert!(b.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(30)).await;

        let trial = b.try_acquire().expect("trial admitted");
        assert!(trial.is_trial());
        assert_eq!(b.state(), CircuitState::HalfOpen);

        // A concurrent caller is rejected while the trial is outstanding.
        let err = b.try_acquire().unwrap_err();
        assert_eq!(err.dependency, "media");

        trial.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let b = breaker(1, 30);
        fail(&b);
        tokio::time::advance(Duration::from_secs(31)).await;

        b.try_acquire().unwrap().record_failure();
        assert_eq!(b.state(), CircuitState::Open);

        // opened_at was reset, so the full recovery timeout applies again.
        tokio::time::advance(Duration::from_secs(20)).await;
        let err = b.try_acquire().unwrap_err();
        assert!(err.retry_after.unwrap() <= Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(b.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_releases_slot() {
        let b = breaker(1, 5);
        fail(&b);
        tokio::time::advance(Duration::from_secs(5)).await;

        let trial = b.try_acquire().unwrap();
        drop(trial);
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let next = b.try_acquire().expect("slot released");
        assert!(next.is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_errors_do_not_trip() {
        let b = breaker(1, 60);
        let result: Result<(), ReelflowError> = b
            .call(|| async { Err(ValidationError::new("identifier", "bad").into()) })
            .await;
        assert!(result.is_err());
        assert_eq!(b.state(), CircuitState::Closed);

        let result: Result<(), ReelflowError> = b
            .call(|| async { Err(CollaboratorError::transient("503").into()) })
            .await;
        assert!(result.is_err());
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn test_manual_reset() {
        let b = breaker(1, 600);
        fail(&b);
        assert_eq!(b.state(), CircuitState::Open);

        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.try_acquire().is_ok());
    }

    #[test]
    fn test_registry_shares_instances() {
        let registry = BreakerRegistry::new();
        let config = BreakerConfig::new(1, Duration::from_secs(60));

        let a = registry.get_or_create("content", &config);
        let b = registry.get_or_create("content", &BreakerConfig::default());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.config().failure_threshold, 1);

        registry.get_or_create("publisher", &config);
        assert_eq!(registry.len(), 2);

        fail(&a);
        let states = registry.states();
        assert_eq!(states["content"], CircuitState::Open);
        assert_eq!(states["publisher"], CircuitState::Closed);

        assert!(registry.reset("content"));
        assert!(!registry.reset("missing"));
        assert_eq!(registry.states()["content"], CircuitState::Closed);
    }

    #[test]
    fn test_global_registry_is_shared() {
        let first = BreakerRegistry::global();
        let second = BreakerRegistry::global();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
