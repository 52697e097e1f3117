use std::time::Duration;

use clap::Parser;
use lamport_mutex::sync::cluster::{self, ClusterConfig};
use rand::Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Lamport's distributed mutual exclusion, one thread per process over FIFO channels
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Number of processes
    #[arg(short, long, default_value_t = ClusterConfig::default().procs)]
    procs: usize,

    /// Critical section entries per process
    #[arg(short, long, default_value_t = ClusterConfig::default().requests)]
    requests: usize,

    /// Upper bound on random time spent inside the critical section
    #[arg(long, default_value_t = 0)]
    work_ms: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    let args = Args::parse();
    let config = ClusterConfig {
        procs: args.procs,
        requests: args.requests,
    };
    let done = cluster::run(&config, |pid| {
        info!(%pid, "in critical section");
        if args.work_ms > 0 {
            let t = rand::thread_rng().gen_range(0..=args.work_ms);
            std::thread::sleep(Duration::from_millis(t));
        }
    })?;

    let entries: usize = done.iter().map(|c| c.granted.len()).sum();
    let clock = done.iter().map(|c| c.clock).max().unwrap_or_default();
    info!(
        procs = done.len(),
        entries,
        clock,
        "all processes terminated"
    );
    Ok(())
}
