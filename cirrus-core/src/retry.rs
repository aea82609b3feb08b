//! Bounded fixed-delay retry
//!
//! Runs an async action up to `max_attempts` times. An abort predicate
//! short-circuits terminal errors; a callback observes every other failure.

use std::future::Future;
use std::time::Duration;

/// Default attempts for a ranged download
pub const DOWNLOAD_RETRY_ATTEMPTS: u32 = 2;

/// Default pause between download attempts
pub const DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first one
    pub max_attempts: u32,
    /// Fixed pause between tries
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DOWNLOAD_RETRY_ATTEMPTS,
            delay: DOWNLOAD_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Policy that never retries
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Execute `action` under `policy`.
///
/// `action` receives the zero-based attempt number. When it fails and
/// `should_abort` returns true, the error is returned at once and `on_retry`
/// is not called. Every other failure calls `on_retry` exactly once, including
/// the final one, before either sleeping or returning that last error.
pub async fn retry<T, E, F, Fut, A, R>(
    policy: RetryPolicy,
    mut action: F,
    should_abort: A,
    mut on_retry: R,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    A: Fn(&E) -> bool,
    R: FnMut(&E, u32),
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match action(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if should_abort(&err) {
                    return Err(err);
                }
                on_retry(&err, attempt);

                attempt += 1;
                if attempt >= attempts {
                    return Err(err);
                }
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
}
