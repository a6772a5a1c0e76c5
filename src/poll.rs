//! Fixed-interval polling with an attempt budget and cancellation.
//!
//! Used for every "wait until the cluster says so" loop: Tiller becoming
//! reachable after `helm init`, and pods of a release reaching `Running`.
//!
//! # Example
//!
//! ```ignore
//! use fabricctl::poll::{poll_until, PollPolicy};
//!
//! poll_until(&PollPolicy::default(), &cancel, "tiller", |_attempt| async {
//!     Ok(executor.execute("helm list").await.ok().map(|_| ()))
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{Error, Result};

/// Default number of readiness attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 40;

/// Default sleep between attempts
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

/// How often and how long to poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Sleep between two attempts
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl PollPolicy {
    /// Create a policy with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Create a policy that polls forever (until cancelled)
    pub fn infinite(interval: Duration) -> Self {
        Self {
            max_attempts: 0,
            interval,
        }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Result type for polling check functions.
///
/// - `Ok(Some(value))` - Condition met, return the value
/// - `Ok(None)` - Condition not met yet, keep polling
/// - `Err(e)` - Fatal error, stop polling immediately
pub type PollResult<T> = Result<Option<T>>;

/// Poll `check` until it yields a value.
///
/// The token is checked before every attempt and interrupts the sleep
/// between attempts. Exhausting the budget returns
/// [`Error::ReadinessTimeout`] naming `target`.
pub async fn poll_until<T, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    target: &str,
    mut check: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PollResult<T>>,
{
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        attempt += 1;

        if let Some(value) = check(attempt).await? {
            debug!(condition = %target, attempt, "Condition met");
            return Ok(value);
        }

        if policy.exhausted(attempt) {
            return Err(Error::ReadinessTimeout {
                target: target.to_string(),
                attempts: attempt,
            });
        }

        info!(
            condition = %target,
            attempt,
            delay_secs = policy.interval.as_secs_f64(),
            "Not ready yet, waiting"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            max_attempts,
            interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let cancel = CancellationToken::new();
        let result = poll_until(&fast(3), &cancel, "op", |_| async { Ok(Some(42)) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_succeeds_after_pending_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let cancel = CancellationToken::new();

        let result = poll_until(&fast(5), &cancel, "op", |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(None)
                } else {
                    Ok(Some("ready"))
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ready");
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let cancel = CancellationToken::new();

        let result: Result<()> = poll_until(&fast(3), &cancel, "peer0", |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        })
        .await;

        match result {
            Err(Error::ReadinessTimeout { target, attempts }) => {
                assert_eq!(target, "peer0");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_polling() {
        let cancel = CancellationToken::new();
        let result: Result<()> = poll_until(&fast(5), &cancel, "op", |attempt| async move {
            assert_eq!(attempt, 1);
            Err(Error::precondition("gone"))
        })
        .await;
        assert!(matches!(result, Err(Error::Precondition(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> =
            poll_until(&fast(0), &cancel, "op", |_| async {
                Err(Error::validation("check must not run"))
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_infinite_poll() {
        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        let policy = PollPolicy::infinite(Duration::from_secs(3600));

        let result: Result<()> = poll_until(&policy, &cancel, "tiller", move |_| {
            trip.cancel();
            async { Ok(None) }
        })
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn default_policy_is_bounded() {
        let policy = PollPolicy::default();
        assert!(policy.max_attempts > 0);
        assert_eq!(PollPolicy::with_max_attempts(7).interval, DEFAULT_INTERVAL);
        assert_eq!(PollPolicy::infinite(DEFAULT_INTERVAL).max_attempts, 0);
    }
}
