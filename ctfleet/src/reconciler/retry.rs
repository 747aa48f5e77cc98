//! Capped exponential backoff for transient hypervisor errors.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ApiError, ApiResult, Operation};

/// Backoff settings. Delay before retry `n` (1-based) is
/// `min(base * factor^(n-1), max)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub factor: u32,
    pub max_delay_ms: u64,
    /// Total attempts including the first call.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            factor: 2,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1);
        let multiplier = u64::from(self.factor).saturating_pow(exp);
        let delay = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// How a retried call ended.
#[derive(Debug)]
pub(crate) enum RetryError {
    Api { attempts: u32, error: ApiError },
    Cancelled,
}

/// Run `call` until it succeeds, fails fatally, or the attempt budget is spent.
///
/// Each attempt is also bounded by `call_timeout`; an elapsed timeout counts
/// as a transient error.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    call_timeout: Duration,
    cancel: &CancellationToken,
    op: Operation,
    mut call: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            r = tokio::time::timeout(call_timeout, call()) => match r {
                Ok(inner) => inner,
                Err(_) => Err(ApiError::Transient(format!("{} timed out after {:?}", op, call_timeout))),
            },
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() || attempt >= max_attempts => {
                return Err(RetryError::Api {
                    attempts: attempt,
                    error: e,
                });
            }
            Err(e) => e,
        };

        let delay = policy.delay_for(attempt);
        warn!(
            "{} attempt {}/{} failed: {}. Retrying in {:?}",
            op, attempt, max_attempts, error, delay
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
