//! Bounded retry and convergence polling.
//!
//! Every cloud call in the reconciler goes through `RetryPolicy`, which
//! retries transient errors a fixed number of times at a fixed interval.
//! Waits for eventual provider-side convergence go through `Poller`,
//! which re-runs a probe until it yields a value or the deadline lapses.
//! Both are plain futures: dropping them (or racing them in a `select!`)
//! cancels cleanly, and a timed-out poll leaves the caller's state
//! untouched since the underlying operation may still finish later.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::provider::{CloudError, CloudResult};

/// Fixed-interval retry for transient cloud errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying while it fails transiently. Unrecoverable and
    /// not-found errors are returned immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> CloudResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CloudResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!(attempt, max = self.attempts, error = %e, "transient cloud error, retrying");
                    tokio::time::sleep(self.interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Error from a convergence poll.
#[derive(Debug, Error)]
pub enum PollError {
    /// The deadline lapsed before the probe produced a value. The
    /// watched operation may still complete asynchronously.
    #[error("poll timed out after {0:?}")]
    Timeout(Duration),

    /// The probe failed with a non-transient cloud error.
    #[error(transparent)]
    Cloud(#[from] CloudError),
}

/// Fixed-interval poll with an overall deadline.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Poller {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    /// Re-run `probe` until it returns `Ok(Some(_))` or the deadline
    /// lapses. Transient probe errors are logged and absorbed into the
    /// next iteration; other errors abort the poll.
    pub async fn poll<T, F, Fut>(&self, mut probe: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CloudResult<Option<T>>>,
    {
        let loop_fut = async {
            loop {
                match probe().await {
                    Ok(Some(value)) => return Ok(value),
                    Ok(None) => {}
                    Err(e) if e.is_transient() => {
                        debug!(error = %e, "transient error during poll, will retry");
                    }
                    Err(e) => return Err(PollError::Cloud(e)),
                }
                tokio::time::sleep(self.interval).await;
            }
        };

        match tokio::time::timeout(self.deadline, loop_fut).await {
            Ok(result) => result,
            Err(_) => Err(PollError::Timeout(self.deadline)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_returns_first_success() {
        let policy = RetryPolicy {
            attempts: 3,
            interval: Duration::from_millis(1),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_probe = Arc::clone(&calls);

        let result: CloudResult<u32> = policy
            .run(|| {
                let calls = Arc::clone(&calls_probe);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_recovers_from_transient() {
        let policy = RetryPolicy {
            attempts: 3,
            interval: Duration::from_millis(1),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_probe = Arc::clone(&calls);

        let result: CloudResult<&str> = policy
            .run(|| {
                let calls = Arc::clone(&calls_probe);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CloudError::Transient("rate limited".to_string()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_attempts() {
        let policy = RetryPolicy {
            attempts: 2,
            interval: Duration::from_millis(1),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_probe = Arc::clone(&calls);

        let result: CloudResult<()> = policy
            .run(|| {
                let calls = Arc::clone(&calls_probe);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CloudError::Transient("still down".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(CloudError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_does_not_retry_unrecoverable() {
        let policy = RetryPolicy {
            attempts: 5,
            interval: Duration::from_millis(1),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_probe = Arc::clone(&calls);

        let result: CloudResult<()> = policy
            .run(|| {
                let calls = Arc::clone(&calls_probe);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CloudError::Unrecoverable("quota exceeded".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(CloudError::Unrecoverable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn poll_returns_when_predicate_holds() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_probe = Arc::clone(&calls);

        let value = poller
            .poll(|| {
                let calls = Arc::clone(&calls_probe);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                        Ok(None)
                    } else {
                        Ok(Some(42))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn poll_times_out() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_millis(20));

        let result: Result<(), PollError> = poller.poll(|| async { Ok(None) }).await;
        assert!(matches!(result, Err(PollError::Timeout(_))));
    }

    #[tokio::test]
    async fn poll_absorbs_transient_errors() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_probe = Arc::clone(&calls);

        let value = poller
            .poll(|| {
                let calls = Arc::clone(&calls_probe);
                async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 => Err(CloudError::Transient("blip".to_string())),
                        1 => Ok(None),
                        _ => Ok(Some("converged")),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "converged");
    }

    #[tokio::test]
    async fn poll_aborts_on_unrecoverable() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(1));

        let result: Result<(), PollError> = poller
            .poll(|| async { Err(CloudError::Unrecoverable("gone".to_string())) })
            .await;
        assert!(matches!(result, Err(PollError::Cloud(CloudError::Unrecoverable(_)))));
    }
}
