use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;

/// Timeout + bounded exponential backoff applied to every store call.
///
/// Attempt `n` (0-based) that fails with a retryable error sleeps
/// `min(backoff_initial * 2^n, backoff_max)` before the next try. After
/// `max_retries` retries the last error is returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        std::cmp::min(self.backoff_initial.saturating_mul(factor), self.backoff_max)
    }

    pub async fn run<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let res = match tokio::time::timeout(self.timeout, call()).await {
                Ok(r) => r,
                Err(_) => Err(StoreError::Timeout {
                    op,
                    after_ms: millis(self.timeout),
                }),
            };

            match res {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        op,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = millis(delay),
                        error = %e,
                        "store call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
