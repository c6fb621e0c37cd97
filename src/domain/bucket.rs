//! Raw completion events and their per-second grouping

use crate::domain::sampling::sort_and_merge;
use std::time::SystemTime;

/// One reported unit of work, alive only until it is bucketed
#[derive(Debug, Clone, Copy)]
pub struct Trip {
    pub start: SystemTime,
    pub success: bool,
}

/// Response times (ms) of all trips finalized within one wall-clock second.
///
/// Both sequences stay ascending: new samples are staged in unsorted batches
/// and folded in with [`sort_and_merge`] by [`SecondBucket::merge_pending`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecondBucket {
    pub epoch_second: i64,
    success_times: Vec<u64>,
    failure_times: Vec<u64>,
    pending_success: Vec<u64>,
    pending_failure: Vec<u64>,
}

impl SecondBucket {
    pub fn new(epoch_second: i64) -> Self {
        Self { epoch_second, ..Self::default() }
    }

    /// Stage a response time; it becomes visible after `merge_pending`
    #[inline]
    pub fn push(&mut self, success: bool, response_ms: u64) {
        if success {
            self.pending_success.push(response_ms);
        } else {
            self.pending_failure.push(response_ms);
        }
    }

    /// Fold staged samples into the sorted sequences
    pub fn merge_pending(&mut self) {
        sort_and_merge(&mut self.success_times, &mut self.pending_success);
        sort_and_merge(&mut self.failure_times, &mut self.pending_failure);
    }

    /// Build a bucket from already collected samples (any order)
    pub fn from_samples(epoch_second: i64, success: Vec<u64>, failure: Vec<u64>) -> Self {
        let mut bucket = Self::new(epoch_second);
        bucket.pending_success = success;
        bucket.pending_failure = failure;
        bucket.merge_pending();
        bucket
    }

    pub fn success_times(&self) -> &[u64] {
        &self.success_times
    }

    pub fn failure_times(&self) -> &[u64] {
        &self.failure_times
    }

    /// Number of samples including staged ones
    pub fn len(&self) -> usize {
        self.success_times.len()
            + self.failure_times.len()
            + self.pending_success.len()
            + self.pending_failure.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
