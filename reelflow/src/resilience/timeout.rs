//! Deadline enforcement for single operations and polling sessions.

use crate::errors::{ReelflowError, TimeoutError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Wraps a future with a hard deadline.
///
/// On expiry the wrapped future is dropped and its result discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutGuard {
    after: Duration,
}

impl TimeoutGuard {
    /// Deadline for quick metadata calls.
    pub const FAST: Duration = Duration::from_secs(10);
    /// Deadline for ordinary remote calls.
    pub const DEFAULT: Duration = Duration::from_secs(30);
    /// Deadline for a whole video rendering session.
    pub const VIDEO: Duration = Duration::from_secs(1800);

    /// Creates a guard with the given deadline.
    #[must_use]
    pub fn new(after: Duration) -> Self {
        Self { after }
    }

    /// Creates a guard from a millisecond deadline.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// 10 second guard.
    #[must_use]
    pub fn fast() -> Self {
        Self::new(Self::FAST)
    }

    /// 30 minute guard for rendering.
    #[must_use]
    pub fn video() -> Self {
        Self::new(Self::VIDEO)
    }

    /// Returns the deadline.
    #[must_use]
    pub fn after(&self) -> Duration {
        self.after
    }

    /// Awaits `future`, failing with a [`TimeoutError`] once the deadline passes.
    pub async fn wrap<T, Fut>(&self, operation: &str, future: Fut) -> Result<T, TimeoutError>
    where
        Fut: Future<Output = T>,
    {
        match tokio::time::timeout(self.after, future).await {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.after.as_millis() as u64,
                    "Operation timed out"
                );
                Err(TimeoutError::new(operation, self.after))
            }
        }
    }

    /// Runs a fallible operation under the deadline.
    ///
    /// Expiry yields a retryable [`ReelflowError::Timeout`].
    pub async fn run<T, Fut>(&self, operation: &str, future: Fut) -> Result<T, ReelflowError>
    where
        Fut: Future<Output = Result<T, ReelflowError>>,
    {
        self.wrap(operation, future).await?
    }

    /// Runs a whole polling session under the deadline.
    ///
    /// Expiry yields a terminal `TimedOut` error.
    pub async fn run_session<T, Fut>(&self, operation: &str, future: Fut) -> Result<T, ReelflowError>
    where
        Fut: Future<Output = Result<T, ReelflowError>>,
    {
        match self.wrap(operation, future).await {
            Ok(result) => result,
            Err(_) => Err(TimeoutError::polling(operation, self.after).into()),
        }
    }
}

impl Default for TimeoutGuard {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_presets() {
        assert_eq!(TimeoutGuard::fast().after(), Duration::from_secs(10));
        assert_eq!(TimeoutGuard::default().after(), Duration::from_secs(30));
        assert_eq!(TimeoutGuard::video().after(), Duration::from_secs(1800));
        assert_eq!(TimeoutGuard::from_millis(250).after(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_within_deadline() {
        let guard = TimeoutGuard::new(Duration::from_secs(5));
        let result = guard
            .run("fetch", async {
                tokio::time::sleep(Duration::from_secs(4)).await;
                Ok::<_, ReelflowError>("content")
            })
            .await;
        assert_eq!(result.unwrap(), "content");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_retryable_timeout() {
        let guard = TimeoutGuard::new(Duration::from_secs(5));
        let err = guard
            .run("fetch", async {
                tokio::time::sleep(Duration::from_secs(6)).await;
                Ok::<_, ReelflowError>(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("fetch"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expiry_is_terminal() {
        let guard = TimeoutGuard::new(Duration::from_secs(30));
        let err = guard
            .run_session("produce-media", std::future::pending::<Result<(), ReelflowError>>())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inner_error_passes_through() {
        let guard = TimeoutGuard::fast();
        let err = guard
            .run("publish", async {
                Err::<(), _>(ReelflowError::Internal("boom".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }
}
