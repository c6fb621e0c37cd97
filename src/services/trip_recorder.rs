//! Trip recorder - groups completion events into per-second buckets
//!
//! `TripRecorder::report` is called on the hot path of the system under test,
//! so it only does a `try_send` into a bounded queue and drops the trip when
//! the queue is full. A single `TripRecorderWorker` drains the queue in
//! arrival order, stamps each trip with "now" from the injected clock, and
//! emits one `SecondBucket` per elapsed second that saw traffic.

use crate::domain::{SecondBucket, Trip};
use crate::infra::clock::{elapsed_ms, epoch_secs, Clock};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Producer-side handle. Cheap to share behind an `Arc`.
pub struct TripRecorder {
    /// Bounded trip queue feeding the worker
    trip_tx: mpsc::Sender<Trip>,
    /// Tells the worker to close its input and drain
    shutdown_tx: watch::Sender<bool>,
    /// Set once by `stop()`; later reports are ignored
    stopped: AtomicBool,
    /// Counts accepted and dropped reports
    metrics: Arc<Metrics>,
}

impl TripRecorder {
    /// Record one completed unit of work. Never blocks.
    ///
    /// Dropped silently when the queue is full or the recorder is stopped.
    #[inline]
    pub fn report(&self, start: SystemTime, success: bool) {
        if self.stopped.load(Ordering::Relaxed) {
            return;
        }

        match self.trip_tx.try_send(Trip { start, success }) {
            Ok(()) => self.metrics.record_trip_reported(),
            Err(TrySendError::Full(_)) => {
                self.metrics.record_trip_reported();
                self.metrics.record_trip_dropped();
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Close the input; the worker drains what is queued, emits the open
    /// bucket and closes its output.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::Relaxed) {
            return;
        }
        self.shutdown_tx.send_replace(true);
        debug!("trip_recorder_stop_requested");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

/// Worker owning the active bucket
pub struct TripRecorderWorker {
    /// Receiver for reported trips
    trip_rx: mpsc::Receiver<Trip>,
    /// Finalized buckets for the stat calculator
    bucket_tx: mpsc::Sender<SecondBucket>,
    /// Stop signal from the recorder handle
    shutdown_rx: watch::Receiver<bool>,
    /// Source of "now" for both elapsed time and bucket second
    clock: Arc<dyn Clock>,
    /// Metrics for recorded trips and emitted/dropped buckets
    metrics: Arc<Metrics>,
    /// Max trips drained per wakeup
    batch_size: usize,
    /// Bucket for the current second, not yet emitted
    active: Option<SecondBucket>,
}

impl TripRecorderWorker {
    /// Run until stopped (or every producer handle is gone), then flush
    pub async fn run(mut self) {
        info!(batch_size = %self.batch_size, "trip_recorder_started");

        let mut batch = Vec::with_capacity(self.batch_size);
        loop {
            tokio::select! {
                biased;
                received = self.trip_rx.recv_many(&mut batch, self.batch_size) => {
                    if received == 0 {
                        break; // Channel closed and empty
                    }
                    self.record_batch(&mut batch);
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        // Refuse new trips but keep everything already queued
        self.trip_rx.close();
        while self.trip_rx.recv_many(&mut batch, self.batch_size).await > 0 {
            self.record_batch(&mut batch);
        }

        if let Some(bucket) = self.active.take() {
            self.emit(bucket);
        }

        info!(
            trips_recorded = %self.metrics.trips_recorded(),
            buckets_emitted = %self.metrics.buckets_emitted(),
            "trip_recorder_stopped"
        );
    }

    /// Bucket a drained batch, finalizing the active bucket on second change
    fn record_batch(&mut self, batch: &mut Vec<Trip>) {
        let count = batch.len() as u64;

        for trip in batch.drain(..) {
            let now = self.clock.now();
            let second = epoch_secs(now);

            if self.active.as_ref().map(|b| b.epoch_second) != Some(second) {
                if let Some(finished) = self.active.take() {
                    self.emit(finished);
                }
                self.active = Some(SecondBucket::new(second));
            }

            if let Some(bucket) = self.active.as_mut() {
                bucket.push(trip.success, elapsed_ms(trip.start, now));
            }
        }

        if let Some(bucket) = self.active.as_mut() {
            bucket.merge_pending();
        }
        self.metrics.record_trips_recorded(count);
    }

    /// Hand a finalized bucket downstream; drop it if the queue is full
    fn emit(&self, mut bucket: SecondBucket) {
        bucket.merge_pending();
        if bucket.is_empty() {
            return;
        }

        let samples = bucket.len() as u64;
        match self.bucket_tx.try_send(bucket) {
            Ok(()) => self.metrics.record_bucket_emitted(samples),
            Err(TrySendError::Full(dropped)) => {
                self.metrics.record_bucket_dropped();
                warn!(
                    second = %dropped.epoch_second,
                    samples = %samples,
                    "bucket_dropped_queue_full"
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!("bucket_consumer_gone");
            }
        }
    }
}

/// Create a recorder handle, its worker, and the finalized-bucket stream
///
/// The worker must be spawned; the receiver feeds the stat calculator.
pub fn create_trip_recorder(
    config: &Config,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
) -> (TripRecorder, TripRecorderWorker, mpsc::Receiver<SecondBucket>) {
    let (trip_tx, trip_rx) = mpsc::channel(config.trip_queue_capacity());
    let (bucket_tx, bucket_rx) = mpsc::channel(config.bucket_queue_capacity());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let recorder = TripRecorder {
        trip_tx,
        shutdown_tx,
        stopped: AtomicBool::new(false),
        metrics: metrics.clone(),
    };
    let worker = TripRecorderWorker {
        trip_rx,
        bucket_tx,
        shutdown_rx,
        clock,
        metrics,
        batch_size: config.recorder_batch_size(),
        active: None,
    };
    (recorder, worker, bucket_rx)
}
