//! Metric instruments
//!
//! Lock-free counters, up/down counters and histograms backed by atomics.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic counter, optionally broken down by unit label
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
    by_unit: RwLock<BTreeMap<String, u64>>,
}

impl Counter {
    /// Create a new counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter by a value
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment the total and the series for `unit`
    pub fn inc_for(&self, unit: &str) {
        self.inc();
        *self.by_unit.write().entry(unit.to_string()).or_insert(0) += 1;
    }

    /// Get the current total
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Get the value recorded for one unit
    pub fn get_for(&self, unit: &str) -> u64 {
        self.by_unit.read().get(unit).copied().unwrap_or(0)
    }

    /// Snapshot of the per-unit series
    pub fn units(&self) -> Vec<(String, u64)> {
        self.by_unit
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

/// Counter that can go up and down, e.g. active workers
#[derive(Debug, Default)]
pub struct UpDownCounter {
    value: AtomicI64,
}

impl UpDownCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn dec(&self) {
        self.add(-1);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Increment now and decrement when the returned guard drops
    pub fn track(&self) -> UpDownGuard<'_> {
        self.inc();
        UpDownGuard { counter: self }
    }
}

/// Decrements its counter on drop
pub struct UpDownGuard<'a> {
    counter: &'a UpDownCounter,
}

impl Drop for UpDownGuard<'_> {
    fn drop(&mut self) {
        self.counter.dec();
    }
}

/// Histogram metric
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with the given upper bounds (sorted ascending)
    pub fn new(mut buckets: Vec<f64>) -> Self {
        buckets.sort_by(|a, b| a.total_cmp(b));
        let bucket_counts = (0..buckets.len() + 1).map(|_| AtomicU64::new(0)).collect();

        Self {
            buckets,
            bucket_counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Observe a value
    pub fn observe(&self, value: f64) {
        let idx = self
            .buckets
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.buckets.len());
        self.bucket_counts[idx].fetch_add(1, Ordering::Relaxed);

        // f64 sum kept as bits; CAS until our addition lands
        let mut current = self.sum.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self
                .sum
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Start a timer that observes elapsed seconds when dropped
    pub fn start_timer(&self) -> HistogramTimer<'_> {
        HistogramTimer {
            histogram: self,
            start: Instant::now(),
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    /// Non-cumulative count per upper bound (the overflow bucket is omitted)
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        self.buckets
            .iter()
            .enumerate()
            .map(|(i, &b)| (b, self.bucket_counts[i].load(Ordering::Relaxed)))
            .collect()
    }
}

/// Timer for histogram observations
pub struct HistogramTimer<'a> {
    histogram: &'a Histogram,
    start: Instant,
}

impl Drop for HistogramTimer<'_> {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_counter_per_unit() {
        let counter = Counter::new();
        counter.inc_for("a");
        counter.inc_for("a");
        counter.inc_for("b");

        assert_eq!(counter.get(), 3);
        assert_eq!(counter.get_for("a"), 2);
        assert_eq!(counter.get_for("missing"), 0);
        assert_eq!(counter.units().len(), 2);
    }

    #[test]
    fn test_up_down_guard() {
        let gauge = UpDownCounter::new();
        {
            let _a = gauge.track();
            let _b = gauge.track();
            assert_eq!(gauge.get(), 2);
        }
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new(vec![1.0, 0.1, 0.5]);

        histogram.observe(0.05);
        histogram.observe(0.3);
        histogram.observe(0.8);
        histogram.observe(2.0);

        assert_eq!(histogram.get_count(), 4);
        assert!((histogram.get_sum() - 3.15).abs() < 0.001);
        assert_eq!(
            histogram.get_buckets(),
            vec![(0.1, 1), (0.5, 1), (1.0, 1)]
        );
    }
}
