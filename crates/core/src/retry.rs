use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reposync_client::{ErrorKind, SyncError};

use crate::ratelimit::RateLimiter;

/// Total budget for sleeping through rate-limit resets; a reset further out
/// than what remains of this surfaces the original error instead.
const MAX_RESET_WAIT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub retryable_kinds: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            retryable_kinds: vec![ErrorKind::RateLimit, ErrorKind::Network],
        }
    }
}

/// Run `op` with exponential backoff, honoring classified retryability and
/// rate-limit reset hints. The thunk runs at most `max_retries + 1` times.
pub async fn retry<T, F, Fut>(
    mut op: F,
    config: &RetryConfig,
    limiter: Option<&Arc<RateLimiter>>,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempts_left = config.max_retries;
    let mut delay = config.initial_delay;
    let mut reset_budget = MAX_RESET_WAIT;

    loop {
        if let Some(limiter) = limiter {
            limiter.wait().await;
        }

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.retryable() || !config.retryable_kinds.contains(&err.kind()) {
            return Err(err);
        }

        // A known reset instant beats blind backoff and does not consume
        // the attempt budget.
        if err.kind() == ErrorKind::RateLimit {
            if let Some(wait) = err.retry_after() {
                if wait > reset_budget {
                    return Err(err);
                }
                reset_budget -= wait;
                tracing::debug!(?wait, "sleeping until rate limit reset");
                tokio::time::sleep(wait).await;
                continue;
            }
        }

        if attempts_left == 0 {
            return Err(SyncError::new(
                err.kind(),
                format!("operation failed after {} retries", config.max_retries),
            )
            .with_source(err));
        }
        attempts_left -= 1;
        tracing::debug!(?delay, kind = %err.kind(), "retrying after failure");
        tokio::time::sleep(delay).await;
        delay = delay.mul_f64(config.backoff_factor).min(config.max_delay);
    }
}
