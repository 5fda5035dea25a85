//! Bounded retry with exponential backoff for fallible remote calls.
//!
//! The executor knows nothing about what it calls. Each error type says how it
//! should be treated through [`Retryable`]; the caller picks a [`RetryPolicy`]
//! per call site.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Backoff unit; the delay after attempt `n` (0-based) is `base * 2^n`.
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self { max_attempts, base }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// How the executor reacts to a failed attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Disposition {
    /// Back off for the hinted duration, or the policy's backoff if absent.
    RateLimited(Option<Duration>),
    /// Temporary unavailability, timeouts and transport failures.
    Transient,
    /// Retrying cannot change the outcome.
    Terminal,
}

pub trait Retryable {
    fn disposition(&self) -> Disposition;
}

/// A successful value plus the number of attempts it took.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// The call failed in a way that retrying can't fix.
    #[error("{cause}")]
    Rejected {
        attempts: u32,
        #[source]
        cause: E,
    },
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Rejected { attempts, .. }
            | RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The underlying error of the final attempt.
    pub fn cause(&self) -> &E {
        match self {
            RetryError::Rejected { cause, .. } => cause,
            RetryError::Exhausted { last, .. } => last,
        }
    }

    /// Adds attempts spent elsewhere (e.g. on earlier providers) to the count.
    pub fn with_prior_attempts(self, prior: u32) -> Self {
        match self {
            RetryError::Rejected { attempts, cause } => RetryError::Rejected {
                attempts: attempts + prior,
                cause,
            },
            RetryError::Exhausted { attempts, last } => RetryError::Exhausted {
                attempts: attempts + prior,
                last,
            },
        }
    }
}

/// Runs `call` under `policy`.
///
/// Successes and terminal failures return immediately. Rate limits sleep for
/// the hinted duration (falling back to the exponential backoff); transient
/// failures sleep `base * 2^attempt`. Once `max_attempts` calls have failed,
/// [`RetryError::Exhausted`] carries the count and the last cause. No sleep
/// follows the final attempt.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<Attempted<T>, RetryError<E>>
where
    E: std::error::Error + Retryable + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;

        let error = match call().await {
            Ok(value) => {
                debug!(operation, attempts, "remote call succeeded");
                return Ok(Attempted { value, attempts });
            },
            Err(error) => error,
        };

        let delay = match error.disposition() {
            Disposition::Terminal => {
                return Err(RetryError::Rejected {
                    attempts,
                    cause: error,
                })
            },
            Disposition::RateLimited(hint) => {
                hint.unwrap_or_else(|| policy.backoff(attempts - 1))
            },
            Disposition::Transient => policy.backoff(attempts - 1),
        };

        if attempts >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts,
                last: error,
            });
        }

        warn!(
            operation,
            attempt = attempts,
            max_attempts,
            ?delay,
            %error,
            "remote call failed, backing off"
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;

    #[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
    enum Remote {
        #[error("slow down")]
        RateLimited(Option<Duration>),
        #[error("503")]
        Unavailable,
        #[error("404")]
        NotFound,
    }

    impl Retryable for Remote {
        fn disposition(&self) -> Disposition {
            match self {
                Remote::RateLimited(hint) => Disposition::RateLimited(*hint),
                Remote::Unavailable => Disposition::Transient,
                Remote::NotFound => Disposition::Terminal,
            }
        }
    }

    /// Replays `script` in order, succeeding once it runs out.
    fn scripted(script: &[Remote]) -> (Mutex<VecDeque<Remote>>, AtomicU32) {
        (Mutex::new(script.iter().copied().collect()), AtomicU32::new(0))
    }

    const BASE: Duration = Duration::from_millis(100);

    #[test]
    fn test_backoff() {
        let p = RetryPolicy::new(5, BASE);
        assert_eq!(p.backoff(0), BASE);
        assert_eq!(p.backoff(1), BASE * 2);
        assert_eq!(p.backoff(3), BASE * 8);
        assert_eq!(
            RetryPolicy::new(1, Duration::MAX).backoff(40),
            Duration::MAX
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let (script, calls) =
            scripted(&[Remote::Unavailable, Remote::Unavailable]);
        let started = Instant::now();

        let out = retry(&RetryPolicy::new(3, BASE), "fetch", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            match script.lock().pop_front() {
                Some(e) => Err(e),
                None => Ok("done"),
            }
        })
        .await
        .unwrap();

        assert_eq!(
            out,
            Attempted {
                value: "done",
                attempts: 3,
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // base * 2^0 + base * 2^1
        assert_eq!(started.elapsed(), BASE * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_is_not_retried() {
        let (script, calls) = scripted(&[Remote::NotFound]);
        let started = Instant::now();

        let err = retry(&RetryPolicy::new(5, BASE), "fetch", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            match script.lock().pop_front() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            RetryError::Rejected {
                attempts: 1,
                cause: Remote::NotFound,
            }
        ));
        assert_eq!(err.to_string(), "404");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted() {
        let (script, calls) = scripted(&[Remote::Unavailable; 10]);
        let started = Instant::now();

        let err = retry(&RetryPolicy::new(3, BASE), "upload", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            match script.lock().pop_front() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts(), 3);
        assert_eq!(err.cause(), &Remote::Unavailable);
        assert_eq!(err.to_string(), "gave up after 3 attempts: 503");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // No sleep after the last attempt.
        assert_eq!(started.elapsed(), BASE * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_hint() {
        let hint = Duration::from_secs(7);
        let (script, _) = scripted(&[
            Remote::RateLimited(Some(hint)),
            Remote::RateLimited(None),
        ]);
        let started = Instant::now();

        let out = retry(&RetryPolicy::new(3, BASE), "fetch", || async {
            match script.lock().pop_front() {
                Some(e) => Err(e),
                None => Ok(42),
            }
        })
        .await
        .unwrap();

        assert_eq!(out.attempts, 3);
        // Hinted 7s, then the fallback base * 2^1.
        assert_eq!(started.elapsed(), hint + BASE * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_means_one() {
        let (script, calls) = scripted(&[Remote::Unavailable]);

        let err = retry(&RetryPolicy::new(0, BASE), "fetch", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            match script.lock().pop_front() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_prior_attempts() {
        let err: RetryError<Remote> = RetryError::Exhausted {
            attempts: 2,
            last: Remote::Unavailable,
        };
        assert_eq!(err.with_prior_attempts(3).attempts(), 5);
    }
}
