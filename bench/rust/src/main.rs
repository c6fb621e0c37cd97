//! Report throughput benchmark - measures `report()` call latency and
//! end-to-end pipeline throughput with many producer threads

use clap::Parser;
use loadstat::infra::Config;
use loadstat::services::TestRunner;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

#[derive(Parser)]
#[command(name = "loadstat-bench")]
struct Args {
    /// Producer threads
    #[arg(short, long, default_value = "100")]
    producers: usize,
    /// Reports per producer
    #[arg(short, long, default_value = "5000")]
    reports: usize,
    /// Capacity of every pipeline queue
    #[arg(long, default_value = "1000000")]
    queue_capacity: usize,
    /// Every Nth report is a failure (0 = none)
    #[arg(long, default_value = "10")]
    fail_every: usize,
}

fn print_latency(label: &str, mut samples: Vec<u64>) {
    if samples.is_empty() {
        println!("  {}: no samples", label);
        return;
    }
    samples.sort_unstable();
    let sum: u64 = samples.iter().sum();
    let avg = sum / samples.len() as u64;
    let max = samples[samples.len() - 1];
    let p50 = samples[samples.len() / 2];
    let p99 = samples[(samples.len() as f64 * 0.99) as usize].min(max);

    println!(
        "  {} (ns): min {} avg {} p50 {} p99 {} max {}",
        label, samples[0], avg, p50, p99, max
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Report Throughput Benchmark (Rust)");
    println!("==================================");
    println!("Producers: {}", args.producers);
    println!("Reports per producer: {}", args.reports);
    println!("Queue capacity: {}", args.queue_capacity);
    println!();

    let config = Config::default().with_queue_capacity(args.queue_capacity);
    let runner = Arc::new(TestRunner::new(config));
    let session = runner.start_test("bench")?;

    let started = Instant::now();
    let handles: Vec<_> = (0..args.producers)
        .map(|_| {
            let runner = runner.clone();
            let reports = args.reports;
            let fail_every = args.fail_every;
            std::thread::spawn(move || {
                let mut latencies = Vec::with_capacity(reports);
                for i in 0..reports {
                    let start = SystemTime::now() - Duration::from_millis((i % 50) as u64);
                    let success = fail_every == 0 || i % fail_every != 0;
                    let call = Instant::now();
                    runner.report(start, success);
                    latencies.push(call.elapsed().as_nanos() as u64);
                }
                latencies
            })
        })
        .collect();

    let mut latencies = Vec::with_capacity(args.producers * args.reports);
    for handle in handles {
        latencies.extend(handle.join().map_err(|_| "producer thread panicked")?);
    }
    let produce_elapsed = started.elapsed();

    runner.stop_test();
    session.finished().await;
    let total_elapsed = started.elapsed();

    let snapshot = session.snapshot();
    let metrics = session.metrics().report();

    println!("Results:");
    print_latency("report()", latencies);
    println!("  Produce phase: {:.1} ms", produce_elapsed.as_secs_f64() * 1000.0);
    println!("  Drained after: {:.1} ms", total_elapsed.as_secs_f64() * 1000.0);
    println!("  Accepted: {}", snapshot.total_requests);
    println!("  Processed: {}", snapshot.processed_requests);
    println!("  Dropped: {}", snapshot.dropped_trips);
    println!("  Buckets emitted: {}", metrics.buckets_emitted);
    println!(
        "  Throughput: {:.0} trips/s",
        snapshot.processed_requests as f64 / total_elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("  Error rate: {:.2}%", snapshot.cumulative_error_rate);

    Ok(())
}
