//! Test session - owns one pipeline instance for one test run
//!
//! Lifecycle is `Idle -> Running -> Stopped`; `Stopped` is terminal. Starting
//! wires recorder -> calculator -> fan-out as three tokio tasks joined by
//! bounded queues. Stopping closes the recorder input and each stage drains
//! into the next, so `finished()` resolves only after every queued trip has
//! reached the chart tiers and the cumulative totals.

use crate::domain::{ChartSeries, CumulativeSnapshot, Stat};
use crate::infra::clock::{Clock, SystemClock};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::cumulative::CumulativeTracker;
use crate::services::resolution_manager::ResolutionManager;
use crate::services::stat_calculator::{create_stat_calculator, StatCalculator};
use crate::services::trip_recorder::{create_trip_recorder, TripRecorder};
use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Running,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a session for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub name: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    /// `report()` calls accepted while running, including later drops
    pub total_requests: u64,
    /// Trips that made it into the cumulative totals
    pub processed_requests: u64,
    pub dropped_trips: u64,
    pub cumulative_avg_response_time: f64,
    pub cumulative_error_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stat: Option<Stat>,
}

#[derive(Debug)]
struct Lifecycle {
    status: SessionStatus,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
}

/// Single-subscriber Stat stream for the presentation layer
#[derive(Debug, Default)]
struct StreamSlot {
    tx: Option<mpsc::Sender<Stat>>,
    taken: bool,
    closed: bool,
}

pub struct Session {
    id: String,
    name: String,
    config: Config,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    lifecycle: RwLock<Lifecycle>,
    recorder: OnceLock<TripRecorder>,
    calculator: OnceLock<Arc<StatCalculator>>,
    resolution: Arc<ResolutionManager>,
    cumulative: Arc<CumulativeTracker>,
    stream: Arc<Mutex<StreamSlot>>,
    /// Flips to true once the fan-out task has exited
    drained: Arc<watch::Sender<bool>>,
}

impl Session {
    pub fn new(id: impl Into<String>, name: impl Into<String>, config: Config) -> Self {
        Self::with_clock(id, name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        id: impl Into<String>,
        name: impl Into<String>,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let created_at = DateTime::<Utc>::from(clock.now());
        Self {
            id: id.into(),
            name: name.into(),
            resolution: Arc::new(ResolutionManager::new(config.chart())),
            config,
            clock,
            metrics: Arc::new(Metrics::new()),
            lifecycle: RwLock::new(Lifecycle {
                status: SessionStatus::Idle,
                start_time: created_at,
                end_time: None,
            }),
            recorder: OnceLock::new(),
            calculator: OnceLock::new(),
            cumulative: Arc::new(CumulativeTracker::new()),
            stream: Arc::new(Mutex::new(StreamSlot::default())),
            drained: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Spawn the pipeline and start accepting reports.
    ///
    /// Must be called from within a tokio runtime. Calling it on a session
    /// that is not idle does nothing.
    pub fn start(&self) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("session start requires a tokio runtime")?;

        let mut lifecycle = self.lifecycle.write();
        if lifecycle.status != SessionStatus::Idle {
            debug!(session_id = %self.id, status = %lifecycle.status, "session_start_ignored");
            return Ok(());
        }

        self.cumulative.reset();

        let (recorder, recorder_worker, bucket_rx) =
            create_trip_recorder(&self.config, self.clock.clone(), self.metrics.clone());
        let (calculator, calculator_worker, stat_rx) =
            create_stat_calculator(&self.config, bucket_rx, self.metrics.clone());
        let fan_out = FanOut {
            session_id: self.id.clone(),
            stat_rx,
            resolution: self.resolution.clone(),
            cumulative: self.cumulative.clone(),
            stream: self.stream.clone(),
            metrics: self.metrics.clone(),
        };

        runtime.spawn(recorder_worker.run());
        runtime.spawn(calculator_worker.run());
        let fan_out_handle = runtime.spawn(fan_out.run());

        let drained = self.drained.clone();
        let session_id = self.id.clone();
        runtime.spawn(async move {
            if let Err(e) = fan_out_handle.await {
                warn!(session_id = %session_id, error = %e, "session_fan_out_failed");
            }
            drained.send_replace(true);
        });

        // Idle guard above means these are set exactly once
        let _ = self.recorder.set(recorder);
        let _ = self.calculator.set(calculator);

        lifecycle.status = SessionStatus::Running;
        lifecycle.start_time = DateTime::<Utc>::from(self.clock.now());
        lifecycle.end_time = None;

        info!(session_id = %self.id, name = %self.name, "session_started");
        Ok(())
    }

    /// Close the pipeline input; queued trips still drain downstream
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.status != SessionStatus::Running {
            debug!(session_id = %self.id, status = %lifecycle.status, "session_stop_ignored");
            return;
        }

        lifecycle.status = SessionStatus::Stopped;
        lifecycle.end_time = Some(DateTime::<Utc>::from(self.clock.now()));

        if let Some(recorder) = self.recorder.get() {
            recorder.stop();
        }

        info!(
            session_id = %self.id,
            name = %self.name,
            total_requests = %self.metrics.trips_reported(),
            dropped_trips = %self.metrics.trips_dropped(),
            "session_stopped"
        );
    }

    /// Report one completed unit of work. Never blocks; no-op unless running.
    #[inline]
    pub fn report(&self, start: SystemTime, success: bool) {
        if let Some(recorder) = self.recorder.get() {
            recorder.report(start, success);
        }
    }

    /// Wait until the pipeline has fully drained after `stop()`.
    ///
    /// Any number of callers may wait, and a cancelled wait leaves the signal
    /// intact. Returns immediately for a session that was never started.
    pub async fn finished(&self) {
        if self.status() == SessionStatus::Idle {
            return;
        }
        let mut drained = self.drained.subscribe();
        // The sender lives as long as `self`, so this only ends on completion
        let _ = drained.wait_for(|done| *done).await;
    }

    /// Take the ordered Stat stream; only the first caller gets it.
    ///
    /// Delivery is best-effort: a full stream drops Stats rather than
    /// slowing the pipeline.
    pub fn take_stat_stream(&self) -> Option<mpsc::Receiver<Stat>> {
        let mut slot = self.stream.lock();
        if slot.taken || slot.closed {
            return None;
        }
        let (tx, rx) = mpsc::channel(self.config.stream_queue_capacity());
        slot.tx = Some(tx);
        slot.taken = true;
        Some(rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> SessionStatus {
        self.lifecycle.read().status
    }

    /// Latest per-second Stat
    pub fn current_stat(&self) -> Option<Stat> {
        self.calculator.get().and_then(|c| c.current_stat())
    }

    pub fn optimized_data(&self) -> ChartSeries {
        self.resolution.optimized_data()
    }

    pub fn cumulative(&self) -> CumulativeSnapshot {
        self.cumulative.snapshot()
    }

    pub fn cumulative_tracker(&self) -> &CumulativeTracker {
        &self.cumulative
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (status, start_time, end_time) = {
            let lifecycle = self.lifecycle.read();
            (lifecycle.status, lifecycle.start_time, lifecycle.end_time)
        };

        let duration_ms = match (status, end_time) {
            (_, Some(end)) => (end - start_time).num_milliseconds(),
            (SessionStatus::Running, None) => {
                (DateTime::<Utc>::from(self.clock.now()) - start_time).num_milliseconds()
            }
            _ => 0,
        }
        .max(0) as u64;

        let cumulative = self.cumulative.snapshot();
        SessionSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            status,
            start_time,
            end_time,
            duration_ms,
            total_requests: self.metrics.trips_reported(),
            processed_requests: cumulative.total_requests,
            dropped_trips: self.metrics.trips_dropped(),
            cumulative_avg_response_time: cumulative.average_response_time,
            cumulative_error_rate: cumulative.error_rate,
            current_stat: self.current_stat(),
        }
    }
}

/// Last pipeline stage: distributes each Stat to the chart tiers, the
/// cumulative totals, and the external stream
struct FanOut {
    session_id: String,
    /// Receiver for calculated Stats, in time order
    stat_rx: mpsc::Receiver<Stat>,
    /// Chart tiers
    resolution: Arc<ResolutionManager>,
    /// Session totals
    cumulative: Arc<CumulativeTracker>,
    /// External stream, if someone took it
    stream: Arc<Mutex<StreamSlot>>,
    /// Counts drops on the external stream
    metrics: Arc<Metrics>,
}

impl FanOut {
    async fn run(mut self) {
        while let Some(stat) = self.stat_rx.recv().await {
            self.resolution.add_data_point(&stat);
            self.cumulative.update(&stat);

            let stream_tx = self.stream.lock().tx.clone();
            if let Some(tx) = stream_tx {
                if let Err(TrySendError::Full(_)) = tx.try_send(stat) {
                    self.metrics.record_stream_dropped();
                }
            }
        }

        self.resolution.flush_pending();
        {
            let mut slot = self.stream.lock();
            slot.tx = None;
            slot.closed = true;
        }

        info!(
            session_id = %self.session_id,
            processed_requests = %self.cumulative.total_requests(),
            "session_pipeline_drained"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::clock::ManualClock;
    use std::time::Duration;

    const T0: u64 = 1_700_000_000;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn manual_session() -> (Arc<ManualClock>, Session) {
        let clock = Arc::new(ManualClock::at_epoch_secs(T0));
        let session = Session::with_clock("s-1", "unit", Config::default(), clock.clone());
        (clock, session)
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (_clock, session) = manual_session();
        assert_eq!(session.status(), SessionStatus::Idle);

        session.start().unwrap();
        assert_eq!(session.status(), SessionStatus::Running);

        session.stop();
        assert_eq!(session.status(), SessionStatus::Stopped);

        // Stopped is terminal
        session.start().unwrap();
        assert_eq!(session.status(), SessionStatus::Stopped);
        session.finished().await;
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let session = Session::new("s-2", "no runtime", Config::default());
        assert!(session.start().is_err());
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_report_before_start_is_noop() {
        let (clock, session) = manual_session();
        session.report(clock.now(), true);
        assert_eq!(session.metrics().trips_reported(), 0);
        assert!(session.current_stat().is_none());
    }

    #[tokio::test]
    async fn test_ten_successes_end_to_end() {
        let (clock, session) = manual_session();
        let mut stream = session.take_stat_stream().unwrap();
        assert!(session.take_stat_stream().is_none());

        session.start().unwrap();
        for i in 1..=10u64 {
            session.report(clock.now() - Duration::from_millis(i * 10), true);
        }
        session.stop();
        session.finished().await;

        let stat = session.current_stat().unwrap();
        assert_eq!(stat.time, T0 as i64);
        assert_eq!(stat.success_count, 10);
        assert!(approx(stat.response_time, 55.0));
        assert!(approx(stat.response_time90, 91.0));

        let streamed = stream.recv().await.unwrap();
        assert_eq!(streamed, stat);
        assert!(stream.recv().await.is_none());

        let data = session.optimized_data();
        assert_eq!(data.recent, vec![stat.clone()]);
        assert_eq!(data.medium, vec![stat.clone()]);
        assert_eq!(data.long_term, vec![stat]);

        let snap = session.snapshot();
        assert_eq!(snap.status, SessionStatus::Stopped);
        assert_eq!(snap.total_requests, 10);
        assert_eq!(snap.processed_requests, 10);
        assert!(approx(snap.cumulative_avg_response_time, 55.0));
        assert_eq!(snap.cumulative_error_rate, 0.0);
    }

    #[tokio::test]
    async fn test_mixed_population_error_rate() {
        let (clock, session) = manual_session();
        session.start().unwrap();
        for i in 0..10 {
            session.report(clock.now(), i != 0);
        }
        session.stop();
        session.finished().await;

        let stat = session.current_stat().unwrap();
        assert_eq!(stat.success_count, 9);
        assert_eq!(stat.failure_count, 1);
        assert!(approx(stat.error_rate, 10.0));
        assert!(approx(session.cumulative().error_rate, 10.0));
    }

    #[tokio::test]
    async fn test_report_after_stop_is_noop() {
        let (clock, session) = manual_session();
        session.start().unwrap();
        session.report(clock.now(), true);
        session.stop();
        session.report(clock.now(), true);
        session.finished().await;

        assert_eq!(session.snapshot().total_requests, 1);
        assert_eq!(session.cumulative().total_requests, 1);
    }

    #[tokio::test]
    async fn test_start_resets_cumulative() {
        let (_clock, session) = manual_session();
        session
            .cumulative_tracker()
            .update(&Stat { success_count: 5, response_time: 9.0, ..Stat::default() });
        assert_eq!(session.cumulative().total_requests, 5);

        session.start().unwrap();
        assert_eq!(session.cumulative().total_requests, 0);
        assert_eq!(session.cumulative().average_response_time, 0.0);
        session.stop();
        session.finished().await;
    }

    #[tokio::test]
    async fn test_snapshot_duration_and_json() {
        let (clock, session) = manual_session();
        assert_eq!(session.snapshot().duration_ms, 0);

        session.start().unwrap();
        clock.advance(Duration::from_millis(2_500));
        assert_eq!(session.snapshot().duration_ms, 2_500);

        session.stop();
        clock.advance(Duration::from_secs(60));
        assert_eq!(session.snapshot().duration_ms, 2_500);
        session.finished().await;

        let json = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(json["status"], "stopped");
        assert_eq!(json["id"], "s-1");
        assert!(json.get("end_time").is_some());
        assert!(json.get("current_stat").is_none());
    }

    #[tokio::test]
    async fn test_cancelled_wait_does_not_skip_drain() {
        let (clock, session) = manual_session();
        session.start().unwrap();
        session.report(clock.now() - Duration::from_millis(7), true);

        // Still running: the wait cannot complete and is abandoned
        let early = tokio::time::timeout(Duration::from_millis(10), session.finished()).await;
        assert!(early.is_err());

        session.stop();
        session.finished().await;

        assert_eq!(session.cumulative().total_requests, 1);
        assert_eq!(session.current_stat().unwrap().success_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_both_see_drain() {
        let (clock, session) = manual_session();
        let session = Arc::new(session);
        session.start().unwrap();
        for _ in 0..50 {
            session.report(clock.now(), true);
        }

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move {
                session.finished().await;
                session.cumulative().total_requests
            })
        };
        tokio::task::yield_now().await;

        session.stop();
        session.finished().await;
        assert_eq!(session.cumulative().total_requests, 50);
        assert_eq!(waiter.await.unwrap(), 50);

        // Already drained: returns at once
        session.finished().await;
    }

    #[tokio::test]
    async fn test_stream_closed_after_drain() {
        let (_clock, session) = manual_session();
        session.start().unwrap();
        session.stop();
        session.finished().await;
        assert!(session.take_stat_stream().is_none());
    }
}
