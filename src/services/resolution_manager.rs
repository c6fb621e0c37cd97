//! Multi-resolution chart series
//!
//! Every Stat lands in the `recent` ring directly. The `medium` and
//! `long_term` tiers accumulate Stats and flush one aggregate per window,
//! triggered by whichever comes first: the window's span in Stat time has
//! elapsed since the previous flush, or the accumulator holds as many points
//! as the window has seconds. The count trigger keeps aggregation moving when
//! quiet seconds leave gaps in the series.
//!
//! Aggregated percentiles are approximate: raw samples are gone at this tier,
//! so p90/p95/p99 are recomputed over the pooled mean/p90/p95/p99 values of
//! the inputs.

use crate::domain::sampling::percentile;
use crate::domain::stat::error_rate_percent;
use crate::domain::{ChartSeries, Stat};
use crate::infra::config::ChartConfig;
use crate::services::ring_buffer::RingBuffer;
use parking_lot::RwLock;
use smallvec::SmallVec;

/// Four pooled values per input; 32 inputs fit without spilling
type Pool = SmallVec<[f64; 128]>;

/// Combine `k >= 1` Stats into one; `None` for an empty slice.
///
/// Counts and TPS are summed, the error rate is recomputed from the summed
/// counts, means are count-weighted, and percentiles are approximated over
/// the pooled per-record summaries. A single record is returned unchanged.
pub fn aggregate_stats(stats: &[Stat]) -> Option<Stat> {
    match stats {
        [] => return None,
        [only] => return Some(only.clone()),
        _ => {}
    }

    let mut aggregated = Stat { time: stats[stats.len() - 1].time, ..Stat::default() };
    let mut success_rt_sum = 0.0;
    let mut failure_rt_sum = 0.0;
    let mut success_pool = Pool::new();
    let mut failure_pool = Pool::new();

    for stat in stats {
        aggregated.success_count += stat.success_count;
        aggregated.failure_count += stat.failure_count;
        aggregated.tps_success += stat.tps_success;
        aggregated.tps_failure += stat.tps_failure;

        if stat.success_count > 0 {
            success_rt_sum += stat.response_time * stat.success_count as f64;
            success_pool.extend([
                stat.response_time,
                stat.response_time90,
                stat.response_time95,
                stat.response_time99,
            ]);
        }
        if stat.failure_count > 0 {
            failure_rt_sum += stat.failure_response_time * stat.failure_count as f64;
            failure_pool.extend([
                stat.failure_response_time,
                stat.failure_response_time90,
                stat.failure_response_time95,
                stat.failure_response_time99,
            ]);
        }
    }

    aggregated.error_rate = error_rate_percent(aggregated.success_count, aggregated.failure_count);

    if aggregated.success_count > 0 {
        aggregated.response_time = success_rt_sum / aggregated.success_count as f64;
        success_pool.sort_unstable_by(f64::total_cmp);
        aggregated.response_time90 = percentile(&success_pool, 90.0);
        aggregated.response_time95 = percentile(&success_pool, 95.0);
        aggregated.response_time99 = percentile(&success_pool, 99.0);
    }
    if aggregated.failure_count > 0 {
        aggregated.failure_response_time = failure_rt_sum / aggregated.failure_count as f64;
        failure_pool.sort_unstable_by(f64::total_cmp);
        aggregated.failure_response_time90 = percentile(&failure_pool, 90.0);
        aggregated.failure_response_time95 = percentile(&failure_pool, 95.0);
        aggregated.failure_response_time99 = percentile(&failure_pool, 99.0);
    }

    Some(aggregated)
}

/// One downsampled tier: accumulator in front of a ring buffer
#[derive(Debug)]
struct Tier {
    buffer: RingBuffer<Stat>,
    accumulator: Vec<Stat>,
    window_secs: i64,
    max_points: usize,
    /// Stat time of the previous flush
    last_flush: Option<i64>,
}

impl Tier {
    fn new(capacity: usize, window_secs: u32) -> Self {
        let window_secs = window_secs.max(1);
        Self {
            buffer: RingBuffer::new(capacity),
            accumulator: Vec::with_capacity(window_secs as usize),
            window_secs: i64::from(window_secs),
            max_points: window_secs as usize,
            last_flush: None,
        }
    }

    fn push(&mut self, stat: &Stat) {
        self.accumulator.push(stat.clone());

        let window_elapsed = match self.last_flush {
            Some(last) => stat.time >= last + self.window_secs,
            None => true,
        };
        if window_elapsed || self.accumulator.len() >= self.max_points {
            self.last_flush = Some(stat.time);
            self.flush();
        }
    }

    fn flush(&mut self) {
        if let Some(aggregated) = aggregate_stats(&self.accumulator) {
            self.buffer.add(aggregated);
        }
        self.accumulator.clear();
    }
}

#[derive(Debug)]
struct Tiers {
    recent: RingBuffer<Stat>,
    medium: Tier,
    long_term: Tier,
}

/// Owner of the three chart tiers.
///
/// Written only by the session fan-out task; snapshots may be taken from any
/// thread. The lock is held for the mutation or the copy, nothing else.
#[derive(Debug)]
pub struct ResolutionManager {
    tiers: RwLock<Tiers>,
}

impl ResolutionManager {
    pub fn new(config: &ChartConfig) -> Self {
        Self {
            tiers: RwLock::new(Tiers {
                recent: RingBuffer::new(config.recent_capacity),
                medium: Tier::new(config.medium_capacity, config.medium_window_secs),
                long_term: Tier::new(config.long_term_capacity, config.long_term_window_secs),
            }),
        }
    }

    pub fn add_data_point(&self, stat: &Stat) {
        let mut tiers = self.tiers.write();
        tiers.recent.add(stat.clone());
        tiers.medium.push(stat);
        tiers.long_term.push(stat);
    }

    /// Aggregate whatever is still accumulating (end of a session)
    pub fn flush_pending(&self) {
        let mut tiers = self.tiers.write();
        tiers.medium.flush();
        tiers.long_term.flush();
    }

    /// Points waiting in the (medium, long-term) accumulators
    pub fn pending(&self) -> (usize, usize) {
        let tiers = self.tiers.read();
        (tiers.medium.accumulator.len(), tiers.long_term.accumulator.len())
    }

    /// Immutable copy of all three tiers, oldest-to-newest
    pub fn optimized_data(&self) -> ChartSeries {
        let tiers = self.tiers.read();
        ChartSeries {
            recent: tiers.recent.get_all(),
            medium: tiers.medium.buffer.get_all(),
            long_term: tiers.long_term.buffer.get_all(),
        }
    }
}

impl Default for ResolutionManager {
    fn default() -> Self {
        Self::new(&ChartConfig::default())
    }
}
