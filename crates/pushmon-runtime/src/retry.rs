use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why [`RetryExecutor::run`] gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The cancellation token fired while waiting between attempts.
    #[error("retry cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: usize },

    /// The operation failed with an error the caller classified as permanent.
    #[error("non-retryable error on attempt {attempts}: {error}")]
    Permanent { attempts: usize, error: E },

    /// Every attempt in the schedule failed; carries the last error.
    #[error("failed after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: usize, last_error: E },
}

impl<E> RetryError<E> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> usize {
        match self {
            RetryError::Cancelled { attempts }
            | RetryError::Permanent { attempts, .. }
            | RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// The operation's own error, if the failure was not a cancellation.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled { .. } => None,
            RetryError::Permanent { error, .. } => Some(error),
            RetryError::Exhausted { last_error, .. } => Some(last_error),
        }
    }
}

/// Runs an operation with a fixed backoff schedule.
///
/// A schedule of `n` delays allows `n + 1` attempts; an empty schedule means
/// a single attempt. Waits between attempts are interrupted by the
/// cancellation token passed to [`RetryExecutor::run`].
///
/// # Examples
///
/// ```
/// use pushmon_runtime::retry::RetryExecutor;
/// use std::time::Duration;
///
/// let retry = RetryExecutor::from_secs(&[1, 3, 5]);
/// assert_eq!(retry.max_attempts(), 4);
/// assert_eq!(retry.schedule()[1], Duration::from_secs(3));
/// assert_eq!(RetryExecutor::no_retry().max_attempts(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    schedule: Vec<Duration>,
}

impl RetryExecutor {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    pub fn no_retry() -> Self {
        Self::default()
    }

    pub fn schedule(&self) -> &[Duration] {
        &self.schedule
    }

    pub fn max_attempts(&self) -> usize {
        self.schedule.len() + 1
    }

    /// Invokes `operation` until it succeeds, fails permanently, the schedule
    /// runs out, or `cancel` fires during a backoff wait.
    pub async fn run<T, E, F, Fut, R>(
        &self,
        cancel: &CancellationToken,
        is_retryable: R,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: Display,
    {
        let mut delays = self.schedule.iter();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !is_retryable(&error) {
                tracing::debug!(attempt = attempts, error = %error, "Non-retryable failure");
                return Err(RetryError::Permanent { attempts, error });
            }

            let Some(delay) = delays.next() else {
                return Err(RetryError::Exhausted {
                    attempts,
                    last_error: error,
                });
            };

            tracing::debug!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying after delay"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts });
                }
                _ = tokio::time::sleep(*delay) => {}
            }
        }
    }
}
