//! Test runner - registry of sessions with at most one running
//!
//! Starting a test stops whichever session is current. Producers report
//! through the runner and land on the current session.

use crate::infra::clock::{Clock, SystemClock};
use crate::infra::config::Config;
use crate::services::session::{Session, SessionSnapshot};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;
use uuid::Uuid;

pub struct TestRunner {
    config: Config,
    clock: Arc<dyn Clock>,
    sessions: RwLock<FxHashMap<String, Arc<Session>>>,
    current: RwLock<Option<Arc<Session>>>,
}

impl TestRunner {
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            sessions: RwLock::new(FxHashMap::default()),
            current: RwLock::new(None),
        }
    }

    /// Stop the current session (if any) and start a new one
    pub fn start_test(&self, name: &str) -> anyhow::Result<Arc<Session>> {
        let id = Uuid::now_v7().to_string();
        let clock = self.clock.clone();
        let session = Arc::new(Session::with_clock(id.clone(), name, self.config.clone(), clock));

        let mut current = self.current.write();
        if let Some(previous) = current.take() {
            previous.stop();
        }

        session.start()?;
        self.sessions.write().insert(id.clone(), session.clone());
        *current = Some(session.clone());

        info!(session_id = %id, name = %name, "test_started");
        Ok(session)
    }

    /// Stop the current session; it stays queryable by id
    pub fn stop_test(&self) -> Option<Arc<Session>> {
        let session = self.current.write().take()?;
        session.stop();
        info!(session_id = %session.id(), "test_stopped");
        Some(session)
    }

    /// Report to the current session; dropped when none is running
    #[inline]
    pub fn report(&self, start: SystemTime, success: bool) {
        if let Some(session) = self.current.read().as_ref() {
            session.report(start, success);
        }
    }

    pub fn current_session(&self) -> Option<Arc<Session>> {
        self.current.read().clone()
    }

    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Snapshots of every session, oldest first
    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        let mut snapshots: Vec<SessionSnapshot> = sessions.iter().map(|s| s.snapshot()).collect();
        snapshots.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        snapshots
    }

    /// Stop every session that is still running
    pub fn close(&self) {
        self.current.write().take();
        let sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        for session in sessions {
            session.stop();
        }
        info!(sessions = %self.sessions.read().len(), "test_runner_closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::clock::ManualClock;
    use crate::services::session::SessionStatus;
    use std::time::Duration;

    fn runner() -> (Arc<ManualClock>, TestRunner) {
        let clock = Arc::new(ManualClock::at_epoch_secs(1_700_000_000));
        (clock.clone(), TestRunner::with_clock(Config::default(), clock))
    }

    #[tokio::test]
    async fn test_start_stops_previous() {
        let (clock, runner) = runner();
        let first = runner.start_test("first").unwrap();
        clock.advance(Duration::from_secs(1));
        let second = runner.start_test("second").unwrap();

        assert_eq!(first.status(), SessionStatus::Stopped);
        assert_eq!(second.status(), SessionStatus::Running);
        assert_eq!(runner.current_session().unwrap().id(), second.id());
        assert_ne!(first.id(), second.id());

        runner.close();
        first.finished().await;
        second.finished().await;
    }

    #[tokio::test]
    async fn test_report_routes_to_current() {
        let (clock, runner) = runner();
        runner.report(clock.now(), true);

        let session = runner.start_test("routing").unwrap();
        runner.report(clock.now(), true);
        runner.report(clock.now(), false);

        let stopped = runner.stop_test().unwrap();
        assert_eq!(stopped.id(), session.id());
        assert!(runner.current_session().is_none());
        runner.report(clock.now(), true);

        session.finished().await;
        assert_eq!(session.snapshot().total_requests, 2);
        assert_eq!(session.cumulative().total_requests, 2);
    }

    #[tokio::test]
    async fn test_new_session_starts_with_zero_totals() {
        let (clock, runner) = runner();
        let first = runner.start_test("warmup").unwrap();
        for _ in 0..20 {
            runner.report(clock.now(), true);
        }
        runner.stop_test();
        first.finished().await;
        assert_eq!(first.cumulative().total_requests, 20);

        let second = runner.start_test("measured").unwrap();
        let cumulative = second.cumulative();
        assert_eq!(cumulative.total_requests, 0);
        assert_eq!(cumulative.average_response_time, 0.0);
        assert_eq!(cumulative.error_rate, 0.0);
        runner.close();
        second.finished().await;
    }

    #[tokio::test]
    async fn test_lookup_and_listing_order() {
        let (clock, runner) = runner();
        let a = runner.start_test("a").unwrap();
        clock.advance(Duration::from_secs(5));
        let b = runner.start_test("b").unwrap();
        runner.close();

        assert_eq!(runner.session(a.id()).unwrap().name(), "a");
        assert!(runner.session("missing").is_none());

        let listed = runner.list_sessions();
        let names: Vec<&str> = listed.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(listed.iter().all(|s| s.status == SessionStatus::Stopped));

        a.finished().await;
        b.finished().await;
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let runner = TestRunner::new(Config::default());
        assert!(runner.start_test("nope").is_err());
        assert!(runner.current_session().is_none());
        assert!(runner.list_sessions().is_empty());
    }
}
