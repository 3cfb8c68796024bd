//! Retry policies
//!
//! Fixed or growing delays between attempts, with optional jitter.

use docpipe_core::CoreError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay schedule between attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_factor: f64,
}

impl RetryPolicy {
    /// Same delay before every retry
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Grow the delay by `multiplier` per attempt, capped at `max_delay`
    pub fn with_backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.multiplier = multiplier.max(1.0);
        self.max_delay = max_delay.max(self.initial_delay);
        self
    }

    /// Spread each delay randomly by up to `factor` of itself (0.0 to 1.0)
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self
            .initial_delay
            .mul_f64(self.multiplier.powi((attempt - 1) as i32));
        self.add_jitter(base.min(self.max_delay))
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        let range = delay.mul_f64(self.jitter_factor);
        if range.is_zero() {
            return delay;
        }

        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(Duration::ZERO..range);
        if rng.gen_bool(0.5) {
            delay + jitter
        } else {
            delay.saturating_sub(jitter)
        }
    }
}

/// Retry `operation` until it succeeds, retries run out, or `cancel` fires.
///
/// The closure receives the 0-indexed attempt number. Cancellation interrupts
/// the delay between attempts and [`CoreError::Cancelled`] is never retried.
pub async fn retry_with_cancel<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, CoreError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                if attempt >= policy.max_retries {
                    return Err(e);
                }

                attempt += 1;
                tracing::debug!(
                    attempt = attempt,
                    max_retries = policy.max_retries,
                    error = %e,
                    "Retrying after failure"
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                    _ = tokio::time::sleep(policy.delay_for_attempt(attempt)) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(100))
            .with_backoff(2.0, Duration::from_millis(300));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(300));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let policy = RetryPolicy::fixed(1, Duration::from_millis(1000)).with_jitter(0.2);

        for _ in 0..50 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(800), "{:?}", delay);
            assert!(delay <= Duration::from_millis(1200), "{:?}", delay);
        }
    }

    #[test]
    fn test_zero_delay_with_jitter() {
        let policy = RetryPolicy::fixed(1, Duration::ZERO).with_jitter(0.5);
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_retry_with_cancel_succeeds_after_failures() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let result = retry_with_cancel(&policy, &cancel, |attempt| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(CoreError::datasource("flaky"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_with_cancel_exhausts() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let result: Result<(), _> = retry_with_cancel(&policy, &cancel, |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::processing("down"))
            }
        })
        .await;

        assert!(matches!(result, Err(CoreError::Processing(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_delay() {
        let policy = RetryPolicy::fixed(5, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), _> = retry_with_cancel(&policy, &cancel, |_| async {
            Err(CoreError::processing("down"))
        })
        .await;

        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancelled_error_is_not_retried() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let result: Result<(), _> = retry_with_cancel(&policy, &cancel, |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::Cancelled)
            }
        })
        .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
