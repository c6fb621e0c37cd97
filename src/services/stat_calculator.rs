//! Stat calculator - derives per-second statistics from finalized buckets
//!
//! Success and failure populations are summarized separately (mean and
//! p90/p95/p99 over the bucket's sorted response times). The most recent
//! `Stat` is cached for polling independently of queue delivery.

use crate::domain::sampling::{mean, percentile};
use crate::domain::stat::error_rate_percent;
use crate::domain::{SecondBucket, Stat};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Summary of one response-time population
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Summary {
    mean: f64,
    p90: f64,
    p95: f64,
    p99: f64,
}

impl Summary {
    fn of(sorted: &[u64]) -> Self {
        if sorted.is_empty() {
            return Self::default();
        }
        Self {
            mean: mean(sorted),
            p90: percentile(sorted, 90.0),
            p95: percentile(sorted, 95.0),
            p99: percentile(sorted, 99.0),
        }
    }
}

/// Compute the `Stat` for one finalized bucket
pub fn calculate_stat(bucket: &SecondBucket) -> Stat {
    let success_count = bucket.success_times().len() as u64;
    let failure_count = bucket.failure_times().len() as u64;
    let success = Summary::of(bucket.success_times());
    let failure = Summary::of(bucket.failure_times());

    Stat {
        time: bucket.epoch_second,
        success_count,
        failure_count,
        tps_success: success_count as f64,
        tps_failure: failure_count as f64,
        response_time: success.mean,
        response_time90: success.p90,
        response_time95: success.p95,
        response_time99: success.p99,
        failure_response_time: failure.mean,
        failure_response_time90: failure.p90,
        failure_response_time95: failure.p95,
        failure_response_time99: failure.p99,
        error_rate: error_rate_percent(success_count, failure_count),
    }
}

/// Read side of the calculator: latest computed Stat
#[derive(Debug, Default)]
pub struct StatCalculator {
    current: RwLock<Option<Stat>>,
}

impl StatCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest computed Stat, `None` before the first bucket
    pub fn current_stat(&self) -> Option<Stat> {
        self.current.read().clone()
    }

    fn set_current(&self, stat: &Stat) {
        *self.current.write() = Some(stat.clone());
    }
}

/// Worker converting the bucket stream into the Stat stream
pub struct StatCalculatorWorker {
    /// Shared read side; holds the latest Stat
    calculator: Arc<StatCalculator>,
    /// Receiver for finalized buckets
    bucket_rx: mpsc::Receiver<SecondBucket>,
    /// Stats for the session fan-out
    stat_tx: mpsc::Sender<Stat>,
    /// Metrics for calculation latency and emitted/dropped Stats
    metrics: Arc<Metrics>,
}

impl StatCalculatorWorker {
    /// Run until the recorder closes its output
    pub async fn run(mut self) {
        info!("stat_calculator_started");

        while let Some(bucket) = self.bucket_rx.recv().await {
            let calc_start = Instant::now();
            let stat = calculate_stat(&bucket);
            drop(bucket);
            self.metrics.record_stat_calculated(calc_start.elapsed().as_micros() as u64);

            self.calculator.set_current(&stat);

            debug!(
                time = %stat.time,
                success = %stat.success_count,
                failure = %stat.failure_count,
                p99 = format!("{:.1}", stat.response_time99),
                "stat_calculated"
            );

            match self.stat_tx.try_send(stat) {
                Ok(()) => self.metrics.record_stat_emitted(),
                Err(TrySendError::Full(dropped)) => {
                    self.metrics.record_stat_dropped();
                    warn!(time = %dropped.time, "stat_dropped_queue_full");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("stat_consumer_gone");
                }
            }
        }

        info!(stats_emitted = %self.metrics.stats_emitted(), "stat_calculator_stopped");
    }
}

/// Create the calculator, its worker, and the Stat stream it feeds
pub fn create_stat_calculator(
    config: &Config,
    bucket_rx: mpsc::Receiver<SecondBucket>,
    metrics: Arc<Metrics>,
) -> (Arc<StatCalculator>, StatCalculatorWorker, mpsc::Receiver<Stat>) {
    let (stat_tx, stat_rx) = mpsc::channel(config.stat_queue_capacity());
    let calculator = Arc::new(StatCalculator::new());
    let worker =
        StatCalculatorWorker { calculator: calculator.clone(), bucket_rx, stat_tx, metrics };
    (calculator, worker, stat_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_ten_successes() {
        let samples: Vec<u64> = (1..=10).map(|v| v * 10).collect();
        let bucket = SecondBucket::from_samples(100, samples, Vec::new());
        let stat = calculate_stat(&bucket);

        assert_eq!(stat.time, 100);
        assert_eq!(stat.success_count, 10);
        assert_eq!(stat.tps_success, 10.0);
        assert!(approx(stat.response_time, 55.0));
        assert!(approx(stat.response_time90, 91.0));
        assert!(approx(stat.response_time95, 95.5));
        assert!(approx(stat.response_time99, 99.1));
        assert_eq!(stat.error_rate, 0.0);
    }

    #[test]
    fn test_empty_population_is_zero() {
        let bucket = SecondBucket::from_samples(5, vec![12, 8], Vec::new());
        let stat = calculate_stat(&bucket);

        assert_eq!(stat.failure_count, 0);
        assert_eq!(stat.tps_failure, 0.0);
        assert_eq!(stat.failure_response_time, 0.0);
        assert_eq!(stat.failure_response_time90, 0.0);
        assert_eq!(stat.failure_response_time99, 0.0);
        assert!(!stat.failure_response_time.is_nan());
    }

    #[test]
    fn test_mixed_error_rate() {
        let bucket = SecondBucket::from_samples(7, vec![10; 9], vec![500]);
        let stat = calculate_stat(&bucket);

        assert_eq!(stat.success_count, 9);
        assert_eq!(stat.failure_count, 1);
        assert!(approx(stat.error_rate, 10.0));
        assert!(approx(stat.failure_response_time, 500.0));
        assert!(approx(stat.failure_response_time99, 500.0));
    }

    #[test]
    fn test_single_sample_percentiles() {
        let bucket = SecondBucket::from_samples(1, vec![42], Vec::new());
        let stat = calculate_stat(&bucket);
        assert_eq!(stat.response_time, 42.0);
        assert_eq!(stat.response_time90, 42.0);
        assert_eq!(stat.response_time95, 42.0);
        assert_eq!(stat.response_time99, 42.0);
    }

    #[tokio::test]
    async fn test_worker_caches_and_forwards() {
        let metrics = Arc::new(Metrics::new());
        let (bucket_tx, bucket_rx) = mpsc::channel(8);
        let (calculator, worker, mut stat_rx) =
            create_stat_calculator(&Config::default(), bucket_rx, metrics.clone());

        assert!(calculator.current_stat().is_none());

        bucket_tx.send(SecondBucket::from_samples(10, vec![1, 2, 3], vec![])).await.unwrap();
        bucket_tx.send(SecondBucket::from_samples(11, vec![4], vec![9])).await.unwrap();
        drop(bucket_tx);
        worker.run().await;

        assert_eq!(stat_rx.recv().await.unwrap().time, 10);
        assert_eq!(stat_rx.recv().await.unwrap().time, 11);
        assert!(stat_rx.recv().await.is_none());

        let current = calculator.current_stat().unwrap();
        assert_eq!(current.time, 11);
        assert!(approx(current.error_rate, 50.0));
        assert_eq!(metrics.stats_emitted(), 2);
    }

    #[tokio::test]
    async fn test_full_stat_queue_drops_but_caches() {
        let metrics = Arc::new(Metrics::new());
        let config = Config::default().with_queue_capacity(1);
        let (bucket_tx, bucket_rx) = mpsc::channel(8);
        let (calculator, worker, mut stat_rx) =
            create_stat_calculator(&config, bucket_rx, metrics.clone());

        for second in 0..3 {
            bucket_tx.send(SecondBucket::from_samples(second, vec![5], vec![])).await.unwrap();
        }
        drop(bucket_tx);
        worker.run().await;

        assert_eq!(stat_rx.recv().await.unwrap().time, 0);
        assert!(stat_rx.recv().await.is_none());
        assert_eq!(metrics.stats_dropped(), 2);
        assert_eq!(calculator.current_stat().unwrap().time, 2);
    }
}
