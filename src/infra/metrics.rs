//! Lock-free pipeline health metrics and periodic reporting
//!
//! Every pipeline stage records into one `Metrics` per session using atomics,
//! so producers calling `report()` never contend on a lock. Reporting swaps
//! the periodic counters to zero to get a consistent snapshot.
//!
//! Relaxed ordering throughout: these are counters, not synchronization.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

const NUM_BUCKETS: usize = 11;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const LATENCY_BOUNDS: [u64; NUM_BUCKETS - 1] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

/// Samples per finalized bucket, powers of 4
/// Buckets: ≤4, ≤16, ≤64, ≤256, ≤1Ki, ≤4Ki, ≤16Ki, ≤64Ki, ≤256Ki, ≤1Mi, >1Mi
const SIZE_BOUNDS: [u64; NUM_BUCKETS - 1] =
    [4, 16, 64, 256, 1024, 4096, 16384, 65536, 262144, 1048576];

/// Compute bucket index for a value using binary search
#[inline]
fn bucket_index(bounds: &[u64; NUM_BUCKETS - 1], value: u64) -> usize {
    bounds.partition_point(|&bound| bound < value)
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
/// Returns the upper bound of the bucket containing the percentile; the
/// overflow bucket reports twice the last bound
fn percentile_from_buckets(
    bounds: &[u64; NUM_BUCKETS - 1],
    buckets: &[u64; NUM_BUCKETS],
    percentile: f64,
) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    let overflow = bounds[NUM_BUCKETS - 2] * 2;

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return bounds.get(i).copied().unwrap_or(overflow);
        }
    }
    overflow
}

/// Lock-free pipeline metrics
pub struct Metrics {
    /// `report()` calls accepted while the recorder was open (monotonic)
    trips_reported: AtomicU64,
    /// Trips reported since last summary (reset on report)
    trips_since_report: AtomicU64,
    /// Trips dropped because the trip queue was full (monotonic)
    trips_dropped: AtomicU64,
    /// Trips placed into a bucket by the recorder worker (monotonic)
    trips_recorded: AtomicU64,
    /// Finalized buckets handed to the calculator (monotonic)
    buckets_emitted: AtomicU64,
    /// Finalized buckets dropped on a full bucket queue (monotonic)
    buckets_dropped: AtomicU64,
    /// Largest bucket since last summary (reset on report)
    bucket_size_max: AtomicU64,
    /// Samples-per-bucket histogram (reset on report)
    bucket_size_buckets: [AtomicU64; NUM_BUCKETS],
    /// Stats delivered to the session fan-out (monotonic)
    stats_emitted: AtomicU64,
    /// Stats dropped on a full stat queue (monotonic)
    stats_dropped: AtomicU64,
    /// Stats dropped on the external stream (monotonic)
    stream_dropped: AtomicU64,
    /// Per-bucket statistics calculation time histogram (reset on report)
    calc_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of calculation times (reset on report)
    calc_latency_sum_us: AtomicU64,
    /// Max calculation time (reset on report)
    calc_latency_max_us: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            trips_reported: AtomicU64::new(0),
            trips_since_report: AtomicU64::new(0),
            trips_dropped: AtomicU64::new(0),
            trips_recorded: AtomicU64::new(0),
            buckets_emitted: AtomicU64::new(0),
            buckets_dropped: AtomicU64::new(0),
            bucket_size_max: AtomicU64::new(0),
            bucket_size_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            stats_emitted: AtomicU64::new(0),
            stats_dropped: AtomicU64::new(0),
            stream_dropped: AtomicU64::new(0),
            calc_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            calc_latency_sum_us: AtomicU64::new(0),
            calc_latency_max_us: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a `report()` call that reached an open recorder (lock-free)
    #[inline]
    pub fn record_trip_reported(&self) {
        self.trips_reported.fetch_add(1, Ordering::Relaxed);
        self.trips_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_trip_dropped(&self) {
        self.trips_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_trips_recorded(&self, count: u64) {
        self.trips_recorded.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a finalized bucket and its sample count
    #[inline]
    pub fn record_bucket_emitted(&self, samples: u64) {
        self.buckets_emitted.fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.bucket_size_max, samples);
        self.bucket_size_buckets[bucket_index(&SIZE_BOUNDS, samples)]
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_bucket_dropped(&self) {
        self.buckets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the time spent deriving one Stat from a bucket
    #[inline]
    pub fn record_stat_calculated(&self, latency_us: u64) {
        self.calc_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        let bucket = bucket_index(&LATENCY_BOUNDS, latency_us);
        self.calc_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.calc_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_stat_emitted(&self) {
        self.stats_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stat_dropped(&self) {
        self.stats_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stream_dropped(&self) {
        self.stream_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn trips_reported(&self) -> u64 {
        self.trips_reported.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn trips_dropped(&self) -> u64 {
        self.trips_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn trips_recorded(&self) -> u64 {
        self.trips_recorded.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn buckets_emitted(&self) -> u64 {
        self.buckets_emitted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn buckets_dropped(&self) -> u64 {
        self.buckets_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stats_emitted(&self) -> u64 {
        self.stats_emitted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stats_dropped(&self) -> u64 {
        self.stats_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stream_dropped(&self) -> u64 {
        self.stream_dropped.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let trips_count = self.trips_since_report.swap(0, Ordering::Relaxed);
        let bucket_size_max = self.bucket_size_max.swap(0, Ordering::Relaxed);
        let bucket_size_buckets = swap_buckets(&self.bucket_size_buckets);

        let calc_lat_buckets = swap_buckets(&self.calc_latency_buckets);
        let calc_latency_sum = self.calc_latency_sum_us.swap(0, Ordering::Relaxed);
        let calc_latency_max = self.calc_latency_max_us.swap(0, Ordering::Relaxed);
        let calc_count: u64 = calc_lat_buckets.iter().sum();

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let trips_per_sec = if elapsed.as_secs_f64() > 0.0 {
            trips_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let calc_avg_us = if calc_count > 0 { calc_latency_sum / calc_count } else { 0 };

        MetricsSummary {
            trips_reported: self.trips_reported(),
            trips_per_sec,
            trips_dropped: self.trips_dropped(),
            trips_recorded: self.trips_recorded(),
            buckets_emitted: self.buckets_emitted(),
            buckets_dropped: self.buckets_dropped(),
            bucket_size_max,
            bucket_size_buckets,
            bucket_size_p99: percentile_from_buckets(&SIZE_BOUNDS, &bucket_size_buckets, 0.99),
            stats_emitted: self.stats_emitted(),
            stats_dropped: self.stats_dropped(),
            stream_dropped: self.stream_dropped(),
            calc_lat_buckets,
            calc_lat_avg_us: calc_avg_us,
            calc_lat_max_us: calc_latency_max,
            calc_lat_p99_us: percentile_from_buckets(&LATENCY_BOUNDS, &calc_lat_buckets, 0.99),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub trips_reported: u64,
    pub trips_per_sec: f64,
    pub trips_dropped: u64,
    pub trips_recorded: u64,
    pub buckets_emitted: u64,
    pub buckets_dropped: u64,
    /// Largest bucket (samples) since the previous summary
    pub bucket_size_max: u64,
    /// Samples-per-bucket histogram
    /// Bounds: ≤4, ≤16, ≤64, ≤256, ≤1Ki, ≤4Ki, ≤16Ki, ≤64Ki, ≤256Ki, ≤1Mi, >1Mi
    pub bucket_size_buckets: [u64; NUM_BUCKETS],
    pub bucket_size_p99: u64,
    pub stats_emitted: u64,
    pub stats_dropped: u64,
    pub stream_dropped: u64,
    /// Stat calculation latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub calc_lat_buckets: [u64; NUM_BUCKETS],
    pub calc_lat_avg_us: u64,
    pub calc_lat_max_us: u64,
    pub calc_lat_p99_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            trips_reported = %self.trips_reported,
            trips_per_sec = format!("{:.1}", self.trips_per_sec),
            trips_dropped = %self.trips_dropped,
            trips_recorded = %self.trips_recorded,
            buckets_emitted = %self.buckets_emitted,
            buckets_dropped = %self.buckets_dropped,
            bucket_size_max = %self.bucket_size_max,
            bucket_size_p99 = %self.bucket_size_p99,
            stats_dropped = %self.stats_dropped,
            stream_dropped = %self.stream_dropped,
            calc_avg_us = %self.calc_lat_avg_us,
            calc_p99_us = %self.calc_lat_p99_us,
            "pipeline_metrics"
        );
    }
}
