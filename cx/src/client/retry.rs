//! Fixed-interval polling
//!
//! No backoff, no jitter: every miss waits exactly `interval` before the next
//! attempt. The only way to abort a wait is to exhaust the attempt bound.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::CoordError;

/// How many times to poll and how long to wait after each miss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts, interval }
    }

    /// Total time a fully exhausted poll spends waiting
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.attempts())
    }

    /// Attempt bound, never less than one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 600,
            interval: Duration::from_millis(1000),
        }
    }
}

/// Poll `attempt` until it yields a value or the policy is exhausted
///
/// `attempt` receives the 1-based attempt number and returns:
/// - `Ok(Some(value))` to finish,
/// - `Ok(None)` for a miss,
/// - `Err(e)` which is a miss when [`CoordError::is_transient`], fatal otherwise.
///
/// Returns `Ok(None)` once every attempt missed; callers map that to the
/// timeout or not-found condition that fits their operation.
pub async fn poll_fixed<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<Option<T>, CoordError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, CoordError>>,
{
    let attempts = policy.attempts();
    for n in 1..=attempts {
        match attempt(n).await {
            Ok(Some(value)) => {
                debug!(attempt = n, "poll_fixed: ready");
                return Ok(Some(value));
            }
            Ok(None) => {
                debug!(attempt = n, attempts, "poll_fixed: miss");
            }
            Err(e) if e.is_transient() => {
                debug!(attempt = n, attempts, error = %e, "poll_fixed: transient error");
            }
            Err(e) => return Err(e),
        }
        tokio::time::sleep(policy.interval).await;
    }
    Ok(None)
}
