//! Histograms for durations and sizes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Buckets (seconds) for control-plane operations: ticks, migrations, archives.
pub const OPERATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0,
];

/// A cumulative histogram.
#[derive(Debug)]
pub struct Histogram {
    name: &'static str,
    help: &'static str,
    bounds: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum_bits: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a histogram with [`OPERATION_BUCKETS`].
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self::with_buckets(name, help, OPERATION_BUCKETS.to_vec())
    }

    /// Create a histogram with custom upper bounds.
    pub fn with_buckets(name: &'static str, help: &'static str, mut bounds: Vec<f64>) -> Self {
        bounds.sort_by(f64::total_cmp);
        let counts = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            name,
            help,
            bounds,
            counts,
            sum_bits: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Metric name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Metric help text.
    pub fn help(&self) -> &'static str {
        self.help
    }

    /// Record one observation.
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .sum_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
        for (bound, count) in self.bounds.iter().zip(&self.counts) {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record a duration in seconds.
    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    /// Time a section; the duration is recorded when the timer drops.
    pub fn start_timer(&self) -> HistogramTimer<'_> {
        HistogramTimer {
            histogram: self,
            start: Instant::now(),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bounds: self.bounds.clone(),
            counts: self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect(),
            sum: f64::from_bits(self.sum_bits.load(Ordering::Relaxed)),
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

/// Records elapsed time into a histogram on drop.
pub struct HistogramTimer<'a> {
    histogram: &'a Histogram,
    start: Instant,
}

impl HistogramTimer<'_> {
    /// Elapsed time so far.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for HistogramTimer<'_> {
    fn drop(&mut self) {
        self.histogram.observe_duration(self.start.elapsed());
    }
}

/// Point-in-time copy of a histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// Bucket upper bounds.
    pub bounds: Vec<f64>,
    /// Cumulative counts per bound.
    pub counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramSnapshot {
    /// Mean of all observations, 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_is_cumulative() {
        let h = Histogram::with_buckets("tick_seconds", "Tick duration", vec![1.0, 0.1, 10.0]);
        h.observe(0.05);
        h.observe(0.5);
        h.observe(20.0);

        let snap = h.snapshot();
        assert_eq!(snap.bounds, vec![0.1, 1.0, 10.0]);
        assert_eq!(snap.counts, vec![1, 2, 2]);
        assert_eq!(snap.count, 3);
        assert!((snap.mean() - 20.55 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_timer_records_on_drop() {
        let h = Histogram::new("migration_seconds", "Migration duration");
        {
            let _timer = h.start_timer();
        }
        assert_eq!(h.snapshot().count, 1);
    }
}
