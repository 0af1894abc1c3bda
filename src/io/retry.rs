use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use super::RangeReader;
use crate::error::IoError;

/// Default number of attempts per read (first try included).
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound for a single backoff delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            max_delay: MAX_RETRY_DELAY,
        }
    }
}

/// Wraps a reader and retries transient failures.
///
/// Only errors for which [`IoError::is_transient`] holds are retried;
/// missing objects and denied access propagate on the first attempt.
pub struct RetryingReader<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: RangeReader> RetryingReader<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<R: RangeReader> RangeReader for RetryingReader<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let mut attempt = 1;
        loop {
            match self.inner.read_exact_at(offset, len).await {
                Ok(data) => return Ok(data),
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        source = self.inner.identifier(),
                        offset,
                        len,
                        attempt,
                        error = %err,
                        "range read failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
