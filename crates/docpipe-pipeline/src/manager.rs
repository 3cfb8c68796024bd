//! Periodic cycle driver shared by both managers

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pool::CycleReport;

/// One unit of periodic work
#[async_trait]
pub trait Cycle: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport;
}

/// Run `cycle` once per interval until `cancel` fires.
///
/// The first tick fires one interval after start. A cycle that overruns the
/// interval delays the next tick instead of queueing catch-up ticks.
pub async fn run_periodic<C: Cycle + ?Sized>(cycle: Arc<C>, cancel: CancellationToken) {
    let period = cycle.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(pipeline = cycle.name(), interval_ms = period.as_millis() as u64, "Manager started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = cycle.run_cycle(&cancel).await;
                debug!(
                    pipeline = cycle.name(),
                    processed = report.processed(),
                    failures = report.failures,
                    abandoned = report.abandoned,
                    "Cycle finished"
                );
            }
        }
    }

    info!(pipeline = cycle.name(), "Manager stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        runs: AtomicUsize,
        interval: Duration,
        work: Duration,
    }

    #[async_trait]
    impl Cycle for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn run_cycle(&self, _cancel: &CancellationToken) -> CycleReport {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            CycleReport::empty(1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_interval() {
        let cycle = Arc::new(Counting {
            runs: AtomicUsize::new(0),
            interval: Duration::from_secs(10),
            work: Duration::ZERO,
        });
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_periodic(cycle.clone(), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycles_do_not_burst() {
        let cycle = Arc::new(Counting {
            runs: AtomicUsize::new(0),
            interval: Duration::from_secs(1),
            work: Duration::from_secs(3),
        });
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_periodic(cycle.clone(), cancel.clone()));

        // ticks at 1s, then 4s (after the 3s cycle), then 7s
        tokio::time::sleep(Duration::from_millis(7500)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 3);

        cancel.cancel();
        handle.await.unwrap();
    }
}
