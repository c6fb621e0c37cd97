//! loadstat - load-test statistics pipeline demo
//!
//! Drives a `TestRunner` with simulated virtual users and logs the live
//! per-second statistics until Ctrl+C or `--duration` elapses.
//!
//! Module structure:
//! - `domain/` - Core types (Trip, SecondBucket, Stat, ChartSeries)
//! - `services/` - Pipeline stages, sessions, runner
//! - `io/` - Stat egress
//! - `infra/` - Infrastructure (Config, Metrics, Clock)

use clap::Parser;
use loadstat::infra::Config;
use loadstat::io::StatEgress;
use loadstat::services::TestRunner;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{debug, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Simulated load test feeding the statistics pipeline
#[derive(Parser, Debug)]
#[command(name = "loadstat", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $LOADSTAT_CONFIG or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Test name recorded on the session
    #[arg(short, long, default_value = "demo")]
    name: String,

    /// Concurrent virtual users
    #[arg(short, long, default_value = "50")]
    users: usize,

    /// Stop after this many seconds (0 = run until Ctrl+C)
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// Fraction of requests that fail, 0.0..=1.0
    #[arg(long, default_value = "0.05")]
    failure_rate: f64,

    /// Shortest simulated request, ms
    #[arg(long, default_value = "5")]
    min_ms: u64,

    /// Longest simulated request, ms
    #[arg(long, default_value = "250")]
    max_ms: u64,

    /// Write the Stat stream to this JSONL file (overrides config)
    #[arg(long)]
    egress: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

/// One simulated user: do work, report it, repeat until shutdown
async fn virtual_user(
    runner: Arc<TestRunner>,
    failure_rate: f64,
    work_ms: (u64, u64),
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut rng = StdRng::from_entropy();
    loop {
        let start = SystemTime::now();
        let work = Duration::from_millis(rng.gen_range(work_ms.0..=work_ms.1));

        tokio::select! {
            _ = tokio::time::sleep(work) => {}
            _ = shutdown_rx.changed() => break,
        }

        runner.report(start, rng.gen::<f64>() >= failure_rate);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Default: INFO, use RUST_LOG=debug for every per-second Stat
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "loadstat starting");

    let config_path = Config::resolve_config_path(args.config.as_deref());
    let mut config = Config::load_from_path(&config_path);
    if let Some(file) = &args.egress {
        config = config.with_egress_file(file.clone());
    }

    info!(
        config_file = %config.config_file(),
        trip_queue_capacity = %config.trip_queue_capacity(),
        recorder_batch_size = %config.recorder_batch_size(),
        recent_capacity = %config.chart().recent_capacity,
        medium_window_secs = %config.chart().medium_window_secs,
        long_term_window_secs = %config.chart().long_term_window_secs,
        egress_file = ?config.egress_file(),
        users = %args.users,
        failure_rate = %args.failure_rate,
        "config_loaded"
    );

    let failure_rate = args.failure_rate.clamp(0.0, 1.0);
    let work_ms = (args.min_ms.min(args.max_ms), args.max_ms.max(args.min_ms));
    let metrics_interval = config.metrics_interval_secs();
    let egress = config.egress_file().map(StatEgress::new);

    let runner = Arc::new(TestRunner::new(config));
    let session = runner.start_test(&args.name)?;

    // Forward the live Stat stream to the log and the egress file
    let mut stream = session
        .take_stat_stream()
        .ok_or_else(|| anyhow::anyhow!("stat stream already taken"))?;
    let stream_task = tokio::spawn(async move {
        while let Some(stat) = stream.recv().await {
            debug!(
                time = %stat.time,
                success = %stat.success_count,
                failure = %stat.failure_count,
                avg_ms = format!("{:.1}", stat.response_time),
                p99_ms = format!("{:.1}", stat.response_time99),
                error_rate = format!("{:.2}", stat.error_rate),
                "stat"
            );
            if let Some(egress) = &egress {
                egress.write_stat(&stat);
            }
        }
        egress
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let users: Vec<_> = (0..args.users)
        .map(|_| {
            let user = virtual_user(runner.clone(), failure_rate, work_ms, shutdown_rx.clone());
            tokio::spawn(user)
        })
        .collect();
    info!(users = %users.len(), "virtual_users_started");

    // Periodic session and pipeline summary
    let reporter_session = session.clone();
    let mut reporter_shutdown = shutdown_rx.clone();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = reporter_shutdown.changed() => break,
            }
            let snapshot = reporter_session.snapshot();
            info!(
                duration_ms = %snapshot.duration_ms,
                total_requests = %snapshot.total_requests,
                processed_requests = %snapshot.processed_requests,
                dropped_trips = %snapshot.dropped_trips,
                avg_ms = format!("{:.1}", snapshot.cumulative_avg_response_time),
                error_rate = format!("{:.2}", snapshot.cumulative_error_rate),
                "session_progress"
            );
            reporter_session.metrics().report().log();
        }
    });

    if args.duration > 0 {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("shutdown_signal_received"),
            _ = tokio::time::sleep(Duration::from_secs(args.duration)) => info!("duration_elapsed"),
        }
    } else {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
    }

    let _ = shutdown_tx.send(true);
    for user in users {
        user.await.ok();
    }
    reporter.await.ok();

    runner.stop_test();
    session.finished().await;
    if let Ok(Some(egress)) = stream_task.await {
        info!(written = %egress.written(), failed = %egress.failed(), "egress_closed");
    }

    let snapshot = session.snapshot();
    let series = session.optimized_data();
    info!(
        session_id = %snapshot.id,
        duration_ms = %snapshot.duration_ms,
        total_requests = %snapshot.total_requests,
        processed_requests = %snapshot.processed_requests,
        dropped_trips = %snapshot.dropped_trips,
        avg_ms = format!("{:.1}", snapshot.cumulative_avg_response_time),
        error_rate = format!("{:.2}", snapshot.cumulative_error_rate),
        recent_points = %series.recent.len(),
        medium_points = %series.medium.len(),
        long_term_points = %series.long_term.len(),
        "session_summary"
    );
    session.metrics().report().log();

    runner.close();
    info!("loadstat shutdown complete");
    Ok(())
}
