//! Session-lifetime running totals
//!
//! Independent of the bounded chart tiers: keeps count-weighted response time
//! sums so the session average is exact over every Stat it has seen.

use crate::domain::stat::error_rate_percent;
use crate::domain::{CumulativeSnapshot, Stat};
use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CumulativeStats {
    pub weighted_success_rt_sum: f64,
    pub weighted_failure_rt_sum: f64,
    pub total_success: u64,
    pub total_failure: u64,
}

impl CumulativeStats {
    fn total(&self) -> u64 {
        self.total_success + self.total_failure
    }

    fn average_response_time(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.weighted_success_rt_sum + self.weighted_failure_rt_sum) / total as f64
    }
}

#[derive(Debug, Default)]
pub struct CumulativeTracker {
    totals: RwLock<CumulativeStats>,
}

impl CumulativeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, stat: &Stat) {
        let mut totals = self.totals.write();
        if stat.success_count > 0 {
            totals.weighted_success_rt_sum += stat.response_time * stat.success_count as f64;
            totals.total_success += stat.success_count;
        }
        if stat.failure_count > 0 {
            totals.weighted_failure_rt_sum +=
                stat.failure_response_time * stat.failure_count as f64;
            totals.total_failure += stat.failure_count;
        }
    }

    /// Count-weighted mean over successes and failures, 0 when empty
    pub fn average_response_time(&self) -> f64 {
        self.totals.read().average_response_time()
    }

    /// Failure percentage over the session, 0 when empty
    pub fn error_rate(&self) -> f64 {
        let totals = self.totals.read();
        error_rate_percent(totals.total_success, totals.total_failure)
    }

    pub fn total_requests(&self) -> u64 {
        self.totals.read().total()
    }

    pub fn totals(&self) -> CumulativeStats {
        *self.totals.read()
    }

    /// Consistent view of all three figures under one read lock
    pub fn snapshot(&self) -> CumulativeSnapshot {
        let totals = self.totals.read();
        CumulativeSnapshot {
            average_response_time: totals.average_response_time(),
            error_rate: error_rate_percent(totals.total_success, totals.total_failure),
            total_requests: totals.total(),
        }
    }

    pub fn reset(&self) {
        *self.totals.write() = CumulativeStats::default();
    }
}
