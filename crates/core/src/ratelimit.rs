use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;

use reposync_client::{Quota, QuotaObserver};

/// Quota thresholds for the adaptive concurrency policy.
const ADAPTIVE_HIGH: u64 = 2000;
const ADAPTIVE_MID: u64 = 1000;
const ADAPTIVE_LOW: u64 = 500;

/// Remaining-quota level below which exponential backoff starts.
const BACKOFF_THRESHOLD: u64 = 500;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Floor of the inter-request pause.
    pub base_delay: Duration,
    /// Ceiling of any computed pause.
    pub max_delay: Duration,
    /// Exponential multiplier applied as quota drops.
    pub backoff_factor: f64,
    /// Fraction in `[0, 1)` of the delay added as random jitter.
    pub jitter: f64,
    pub concurrency_limit: usize,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    /// Below this remaining quota, aggressive throttling kicks in.
    pub min_remaining_requests: u64,
    /// Target delay at the aggressive-throttle threshold.
    pub aggressive_throttle_delay: Duration,
    pub adaptive_concurrency: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.1,
            concurrency_limit: 5,
            min_concurrency: 1,
            max_concurrency: 20,
            min_remaining_requests: 100,
            aggressive_throttle_delay: Duration::from_secs(5),
            adaptive_concurrency: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub total_waits: u64,
    pub total_delay: Duration,
    pub in_flight: usize,
    pub concurrency_limit: usize,
}

struct LimiterState {
    remaining: Option<u64>,
    reset_at: Option<SystemTime>,
    last_call: Option<Instant>,
    semaphore: Arc<Semaphore>,
    limit: usize,
    /// Permits owed back to the semaphore after a shrink caught slots
    /// in flight; consumed as those slots release.
    deficit: usize,
    in_flight: usize,
    total_waits: u64,
    total_delay: Duration,
}

/// Quota-aware gate shared by every worker: time gating via [`RateLimiter::wait`]
/// and concurrency gating via [`RateLimiter::acquire_slot`].
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
}

/// A held concurrency slot; released on drop.
pub struct Slot<'a> {
    limiter: &'a RateLimiter,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.limiter.release_slot();
    }
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let limit = config
            .concurrency_limit
            .clamp(config.min_concurrency.max(1), config.max_concurrency);
        Self {
            state: Mutex::new(LimiterState {
                remaining: None,
                reset_at: None,
                last_call: None,
                semaphore: Arc::new(Semaphore::new(limit)),
                limit,
                deficit: 0,
                in_flight: 0,
                total_waits: 0,
                total_delay: Duration::ZERO,
            }),
            config,
        }
    }

    /// Pause long enough to respect the forge's published quota. The delay
    /// is computed under the lock; the sleep happens with it released.
    pub async fn wait(&self) {
        let delay = {
            let mut state = self.state.lock().unwrap();
            let elapsed = state.last_call.map(|t| t.elapsed());
            let raw = compute_delay(
                &self.config,
                state.remaining,
                state.reset_at,
                elapsed,
                SystemTime::now(),
            );
            let delay = if state.remaining == Some(0) {
                // Exhausted quota waits exactly to the reset instant.
                raw
            } else {
                self.jitter_and_clamp(raw)
            };
            state.total_waits += 1;
            state.total_delay += delay;
            delay
        };

        if !delay.is_zero() {
            tracing::debug!(?delay, "rate limiter pausing");
            tokio::time::sleep(delay).await;
        }

        self.state.lock().unwrap().last_call = Some(Instant::now());
    }

    fn jitter_and_clamp(&self, delay: Duration) -> Duration {
        let mut delay = delay;
        if self.config.jitter > 0.0 && !delay.is_zero() {
            let fraction: f64 = rand::random::<f64>() * self.config.jitter;
            delay += delay.mul_f64(fraction);
        }
        delay.min(self.config.max_delay)
    }

    /// Block until a concurrency slot is available. The returned [`Slot`]
    /// releases its capacity on drop.
    pub async fn acquire_slot(&self) -> Slot<'_> {
        loop {
            let semaphore = self.state.lock().unwrap().semaphore.clone();
            match semaphore.acquire_owned().await {
                Ok(permit) => {
                    // Track the slot manually so shrinks can intercept the
                    // release.
                    permit.forget();
                    break;
                }
                Err(_) => continue,
            }
        }
        self.state.lock().unwrap().in_flight += 1;
        Slot { limiter: self }
    }

    fn release_slot(&self) {
        let mut state = self.state.lock().unwrap();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.deficit > 0 {
            state.deficit -= 1;
        } else {
            state.semaphore.add_permits(1);
        }
    }

    /// Record quota metadata from the latest response and, when adaptive
    /// tuning is on, adjust the concurrency limit to match.
    pub fn update_limits(&self, remaining: u64, reset_epoch: u64) {
        let mut state = self.state.lock().unwrap();
        state.remaining = Some(remaining);
        state.reset_at = Some(UNIX_EPOCH + Duration::from_secs(reset_epoch));

        if !self.config.adaptive_concurrency {
            return;
        }
        let min = self.config.min_concurrency.max(1);
        let max = self.config.max_concurrency.max(min);
        let target = if remaining > ADAPTIVE_HIGH {
            max
        } else if remaining > ADAPTIVE_MID {
            (min + max) / 2
        } else if remaining > ADAPTIVE_LOW {
            min + 2
        } else {
            min
        };
        self.resize_locked(&mut state, target.clamp(min, max));
    }

    /// In-flight holders are unaffected by a shrink; permits they hold are
    /// simply not returned until the deficit is paid down.
    fn resize_locked(&self, state: &mut LimiterState, new_limit: usize) {
        if new_limit == state.limit {
            return;
        }
        if new_limit > state.limit {
            let mut grow = new_limit - state.limit;
            let cancelled = grow.min(state.deficit);
            state.deficit -= cancelled;
            grow -= cancelled;
            if grow > 0 {
                state.semaphore.add_permits(grow);
            }
        } else {
            let shrink = state.limit - new_limit;
            let mut taken = 0;
            while taken < shrink {
                match state.semaphore.try_acquire() {
                    Ok(permit) => {
                        permit.forget();
                        taken += 1;
                    }
                    Err(_) => break,
                }
            }
            state.deficit += shrink - taken;
        }
        tracing::debug!(from = state.limit, to = new_limit, "concurrency limit adjusted");
        state.limit = new_limit;
    }

    pub fn current_limit(&self) -> usize {
        self.state.lock().unwrap().limit
    }

    pub fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock().unwrap();
        RateLimiterStats {
            total_waits: state.total_waits,
            total_delay: state.total_delay,
            in_flight: state.in_flight,
            concurrency_limit: state.limit,
        }
    }
}

impl QuotaObserver for RateLimiter {
    fn observe(&self, quota: Quota) {
        self.update_limits(quota.remaining, quota.reset);
    }
}

/// Raw delay before jitter and clamping: the maximum of base spacing,
/// aggressive throttling and exponential backoff. Exhausted quota waits to
/// the reset instant; an elapsed reset waives all throttling.
fn compute_delay(
    config: &RateLimiterConfig,
    remaining: Option<u64>,
    reset_at: Option<SystemTime>,
    since_last_call: Option<Duration>,
    now: SystemTime,
) -> Duration {
    let base = match since_last_call {
        Some(elapsed) => config.base_delay.saturating_sub(elapsed),
        None => Duration::ZERO,
    };

    let (Some(remaining), Some(reset_at)) = (remaining, reset_at) else {
        return base;
    };
    let until_reset = match reset_at.duration_since(now) {
        Ok(d) => d,
        // The quota window already reset; no throttling applies.
        Err(_) => return Duration::ZERO,
    };
    if remaining == 0 {
        return until_reset;
    }

    let mut delay = base;
    if remaining < config.min_remaining_requests {
        let factor = 1.0 - remaining as f64 / config.min_remaining_requests as f64;
        delay = delay.max(config.aggressive_throttle_delay.mul_f64(factor));
    }
    if remaining < BACKOFF_THRESHOLD {
        let exponent = (5000 - remaining) as f64 / 1000.0;
        delay = delay.max(config.base_delay.mul_f64(config.backoff_factor.powf(exponent)));
    }
    delay
}
