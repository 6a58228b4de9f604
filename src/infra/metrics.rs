//! Lock-free metrics collection and periodic reporting
//!
//! Counters are plain atomics. The periodic report swaps its window values
//! to zero; the `*_total` values only ever grow and back the Prometheus scrape.
//!
//! NOTE: Relaxed ordering throughout. These are statistics only, never use
//! them for coordination.

use crate::domain::event::EventType;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Batch duration bucket boundaries (milliseconds)
/// Buckets: ≤5, ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, >5000
const BUCKET_BOUNDS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];
const NUM_BUCKETS: usize = 11;

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Compute bucket index for a duration value using binary search
#[inline]
fn bucket_index(duration_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < duration_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps periodic counters to get a consistent snapshot.
pub struct Metrics {
    /// Batches run (monotonic)
    batches_total: AtomicU64,
    /// Batches that failed before evaluating anything (monotonic)
    batches_failed: AtomicU64,
    /// Batches since last report (reset on report)
    batches_since_report: AtomicU64,
    /// Sum of batch durations in ms (reset on report)
    batch_duration_sum_ms: AtomicU64,
    /// Max batch duration in ms (reset on report)
    batch_duration_max_ms: AtomicU64,
    /// Batch duration histogram (reset on report)
    batch_duration_buckets: [AtomicU64; NUM_BUCKETS],
    /// Batch duration histogram for scraping (monotonic)
    batch_duration_buckets_total: [AtomicU64; NUM_BUCKETS],
    /// Sum of all batch durations in ms (monotonic)
    batch_duration_sum_total_ms: AtomicU64,
    /// Positions marked processed (monotonic)
    positions_processed: AtomicU64,
    /// Positions left unprocessed after a transient failure (monotonic)
    positions_failed: AtomicU64,
    /// Positions skipped for missing/invalid coordinates (monotonic)
    positions_malformed: AtomicU64,
    /// Positions that crossed the stuck threshold (monotonic)
    positions_stuck: AtomicU64,
    events_enter: AtomicU64,
    events_exit: AtomicU64,
    events_dwell: AtomicU64,
    /// Dwell events withheld by the suppression window (monotonic)
    dwell_suppressed: AtomicU64,
    /// Zones skipped for malformed geometry, counted per batch (monotonic)
    zones_skipped: AtomicU64,
    /// Active zones in the most recent snapshot
    active_zones: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            batches_total: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            batches_since_report: AtomicU64::new(0),
            batch_duration_sum_ms: AtomicU64::new(0),
            batch_duration_max_ms: AtomicU64::new(0),
            batch_duration_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            batch_duration_buckets_total: std::array::from_fn(|_| AtomicU64::new(0)),
            batch_duration_sum_total_ms: AtomicU64::new(0),
            positions_processed: AtomicU64::new(0),
            positions_failed: AtomicU64::new(0),
            positions_malformed: AtomicU64::new(0),
            positions_stuck: AtomicU64::new(0),
            events_enter: AtomicU64::new(0),
            events_exit: AtomicU64::new(0),
            events_dwell: AtomicU64::new(0),
            dwell_suppressed: AtomicU64::new(0),
            zones_skipped: AtomicU64::new(0),
            active_zones: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a completed batch and its duration (lock-free)
    #[inline]
    pub fn record_batch(&self, duration_ms: u64) {
        self.batches_total.fetch_add(1, Ordering::Relaxed);
        self.batches_since_report.fetch_add(1, Ordering::Relaxed);
        self.batch_duration_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);

        self.batch_duration_sum_total_ms.fetch_add(duration_ms, Ordering::Relaxed);

        let bucket = bucket_index(duration_ms);
        self.batch_duration_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.batch_duration_buckets_total[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.batch_duration_max_ms, duration_ms);
    }

    #[inline]
    pub fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_processed(&self) {
        self.positions_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_failed(&self) {
        self.positions_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_malformed(&self) {
        self.positions_malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_stuck(&self) {
        self.positions_stuck.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event(&self, event_type: EventType) {
        let counter = match event_type {
            EventType::Enter => &self.events_enter,
            EventType::Exit => &self.events_exit,
            EventType::Dwell => &self.events_dwell,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dwell_suppressed(&self) {
        self.dwell_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a zone snapshot: how many zones are active and how many were skipped
    #[inline]
    pub fn record_zone_snapshot(&self, active: usize, skipped: usize) {
        self.active_zones.store(active as u64, Ordering::Relaxed);
        self.zones_skipped.fetch_add(skipped as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn positions_processed(&self) -> u64 {
        self.positions_processed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn events_total(&self, event_type: EventType) -> u64 {
        match event_type {
            EventType::Enter => self.events_enter.load(Ordering::Relaxed),
            EventType::Exit => self.events_exit.load(Ordering::Relaxed),
            EventType::Dwell => self.events_dwell.load(Ordering::Relaxed),
        }
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let batches_count = self.batches_since_report.swap(0, Ordering::Relaxed);
        let duration_sum = self.batch_duration_sum_ms.swap(0, Ordering::Relaxed);
        let duration_max = self.batch_duration_max_ms.swap(0, Ordering::Relaxed);
        let batch_buckets = swap_buckets(&self.batch_duration_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let avg_batch_ms = if batches_count > 0 { duration_sum / batches_count } else { 0 };

        MetricsSummary {
            elapsed_secs: elapsed.as_secs_f64(),
            batches_total: self.batches_total.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batches_in_period: batches_count,
            avg_batch_ms,
            max_batch_ms: duration_max,
            batch_p50_ms: percentile_from_buckets(&batch_buckets, 0.50),
            batch_p99_ms: percentile_from_buckets(&batch_buckets, 0.99),
            batch_buckets,
            positions_processed: self.positions_processed.load(Ordering::Relaxed),
            positions_failed: self.positions_failed.load(Ordering::Relaxed),
            positions_malformed: self.positions_malformed.load(Ordering::Relaxed),
            positions_stuck: self.positions_stuck.load(Ordering::Relaxed),
            events_enter: self.events_enter.load(Ordering::Relaxed),
            events_exit: self.events_exit.load(Ordering::Relaxed),
            events_dwell: self.events_dwell.load(Ordering::Relaxed),
            dwell_suppressed: self.dwell_suppressed.load(Ordering::Relaxed),
            zones_skipped: self.zones_skipped.load(Ordering::Relaxed),
            active_zones: self.active_zones.load(Ordering::Relaxed),
        }
    }

    /// Monotonic values for scraping; does not reset anything
    pub fn totals(&self) -> MetricsTotals {
        let mut batch_buckets = [0u64; NUM_BUCKETS];
        for (i, bucket) in self.batch_duration_buckets_total.iter().enumerate() {
            batch_buckets[i] = bucket.load(Ordering::Relaxed);
        }

        MetricsTotals {
            batches_total: self.batches_total.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batch_buckets,
            batch_sum_ms: self.batch_duration_sum_total_ms.load(Ordering::Relaxed),
            positions_processed: self.positions_processed.load(Ordering::Relaxed),
            positions_failed: self.positions_failed.load(Ordering::Relaxed),
            positions_malformed: self.positions_malformed.load(Ordering::Relaxed),
            positions_stuck: self.positions_stuck.load(Ordering::Relaxed),
            events_enter: self.events_enter.load(Ordering::Relaxed),
            events_exit: self.events_exit.load(Ordering::Relaxed),
            events_dwell: self.events_dwell.load(Ordering::Relaxed),
            dwell_suppressed: self.dwell_suppressed.load(Ordering::Relaxed),
            zones_skipped: self.zones_skipped.load(Ordering::Relaxed),
            active_zones: self.active_zones.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counters and the cumulative batch histogram
#[derive(Debug, Clone)]
pub struct MetricsTotals {
    pub batches_total: u64,
    pub batches_failed: u64,
    pub batch_buckets: [u64; NUM_BUCKETS],
    pub batch_sum_ms: u64,
    pub positions_processed: u64,
    pub positions_failed: u64,
    pub positions_malformed: u64,
    pub positions_stuck: u64,
    pub events_enter: u64,
    pub events_exit: u64,
    pub events_dwell: u64,
    pub dwell_suppressed: u64,
    pub zones_skipped: u64,
    pub active_zones: u64,
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub elapsed_secs: f64,
    pub batches_total: u64,
    pub batches_failed: u64,
    pub batches_in_period: u64,
    pub avg_batch_ms: u64,
    pub max_batch_ms: u64,
    pub batch_p50_ms: u64,
    pub batch_p99_ms: u64,
    pub batch_buckets: [u64; NUM_BUCKETS],
    pub positions_processed: u64,
    pub positions_failed: u64,
    pub positions_malformed: u64,
    pub positions_stuck: u64,
    pub events_enter: u64,
    pub events_exit: u64,
    pub events_dwell: u64,
    pub dwell_suppressed: u64,
    pub zones_skipped: u64,
    pub active_zones: u64,
}

impl MetricsSummary {
    /// Log the summary as a single structured line
    pub fn log(&self) {
        info!(
            batches_total = %self.batches_total,
            batches_failed = %self.batches_failed,
            batches_in_period = %self.batches_in_period,
            avg_batch_ms = %self.avg_batch_ms,
            max_batch_ms = %self.max_batch_ms,
            batch_p99_ms = %self.batch_p99_ms,
            positions_processed = %self.positions_processed,
            positions_failed = %self.positions_failed,
            positions_malformed = %self.positions_malformed,
            positions_stuck = %self.positions_stuck,
            events_enter = %self.events_enter,
            events_exit = %self.events_exit,
            events_dwell = %self.events_dwell,
            dwell_suppressed = %self.dwell_suppressed,
            zones_skipped = %self.zones_skipped,
            active_zones = %self.active_zones,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(5), 0);
        assert_eq!(bucket_index(6), 1);
        assert_eq!(bucket_index(5000), 9);
        assert_eq!(bucket_index(5001), 10);
    }

    #[test]
    fn test_percentile_empty() {
        assert_eq!(percentile_from_buckets(&[0; NUM_BUCKETS], 0.99), 0);
    }

    #[test]
    fn test_report_resets_periodic_but_not_monotonic() {
        let metrics = Metrics::new();
        metrics.record_batch(3);
        metrics.record_batch(40);
        metrics.record_position_processed();
        metrics.record_event(EventType::Enter);
        metrics.record_event(EventType::Dwell);

        let first = metrics.report();
        assert_eq!(first.batches_in_period, 2);
        assert_eq!(first.avg_batch_ms, 21);
        assert_eq!(first.max_batch_ms, 40);
        assert_eq!(first.batch_buckets.iter().sum::<u64>(), 2);
        assert_eq!(first.events_enter, 1);
        assert_eq!(first.events_dwell, 1);

        let second = metrics.report();
        assert_eq!(second.batches_in_period, 0);
        assert_eq!(second.max_batch_ms, 0);
        assert_eq!(second.batches_total, 2);
        assert_eq!(second.positions_processed, 1);
    }

    #[test]
    fn test_totals_survive_report() {
        let metrics = Metrics::new();
        metrics.record_batch(7);
        metrics.record_batch(700);
        let _ = metrics.report();

        let totals = metrics.totals();
        assert_eq!(totals.batches_total, 2);
        assert_eq!(totals.batch_sum_ms, 707);
        assert_eq!(totals.batch_buckets[1], 1);
        assert_eq!(totals.batch_buckets[7], 1);
    }

    #[test]
    fn test_zone_snapshot_accumulates_skips() {
        let metrics = Metrics::new();
        metrics.record_zone_snapshot(4, 1);
        metrics.record_zone_snapshot(3, 2);
        let summary = metrics.report();
        assert_eq!(summary.active_zones, 3);
        assert_eq!(summary.zones_skipped, 3);
    }
}
