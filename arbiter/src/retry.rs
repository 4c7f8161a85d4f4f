//! Bounded retry for transient judge failures.

use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::judge::JudgeError;

/// Fixed-interval retry policy.
///
/// Transient failures (rate limits, restarts, network blips) are retried at
/// a flat interval up to an attempt ceiling. When the server supplies a
/// Retry-After hint longer than the interval, that attempt waits the hinted
/// time instead. Permanent failures are returned immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay between attempts
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with an explicit ceiling and interval.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// ceiling is reached.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, JudgeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, JudgeError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.max_attempts => {
                    let delay = match &error {
                        JudgeError::RateLimited {
                            retry_after_ms: Some(ms),
                        } => self.interval.max(Duration::from_millis(*ms)),
                        _ => self.interval,
                    };

                    warn!(
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "Judge call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    if error.is_transient() {
                        error!(
                            attempts = attempt,
                            error = %error,
                            "Judge retry budget exhausted"
                        );
                    }
                    return Err(error);
                }
            }
        }
    }
}
