//! Load-test harness binary.
//!
//! `run` drives simulated clients against a fan-out server and writes a JSON
//! latency report; `summarize` prints the statistics of an existing report.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fanout_bench::{BenchConfig, report};
use fanout_core::logging::{DEFAULT_LEVEL, init_subscriber};

#[derive(Debug, Parser)]
#[command(
    name = "fanout-bench",
    about = "Round-trip latency harness for fan-out WebSocket servers"
)]
struct Args {
    /// Log filter when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = DEFAULT_LEVEL)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a load test and write the report.
    Run(RunArgs),
    /// Print per-client and overall statistics of a report file.
    Summarize {
        /// Report written by `run`.
        file: PathBuf,
    },
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Number of clients to simulate.
    #[arg(long, default_value_t = 10)]
    clients: usize,

    /// Number of messages per client.
    #[arg(long, default_value_t = 100)]
    messages: usize,

    /// Server host.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Upgrade endpoint path.
    #[arg(long, default_value = "/ws")]
    path: String,

    /// Label of the server under test (goes into the report file name).
    #[arg(long, default_value = "rust")]
    server: String,

    /// Directory for the report.
    #[arg(long, default_value = "metrics")]
    output_dir: PathBuf,

    /// How long to wait for a response, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    read_timeout_ms: u64,

    /// Send attempts per message (at least 1).
    #[arg(
        long,
        default_value_t = 3,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    max_retries: usize,

    /// Pause after a failed reconnect, in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    retry_backoff_ms: u64,
}

impl From<RunArgs> for BenchConfig {
    fn from(args: RunArgs) -> Self {
        Self {
            clients: args.clients,
            messages: args.messages,
            host: args.host,
            port: args.port,
            path: args.path,
            server: args.server,
            output_dir: args.output_dir,
            read_timeout: Duration::from_millis(args.read_timeout_ms),
            max_retries: args.max_retries,
            retry_backoff: Duration::from_millis(args.retry_backoff_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_subscriber(&args.log_level);

    match args.command {
        Command::Run(run) => {
            let config = BenchConfig::from(run);
            let (path, results) = fanout_bench::run(config)
                .await
                .context("benchmark run failed")?;
            print!("{}", report::render_summary(&results));
            println!("{}", path.display());
        }
        Command::Summarize { file } => {
            let results = report::read_report(&file)
                .with_context(|| format!("failed to load report: {}", file.display()))?;
            print!("{}", report::render_summary(&results));
        }
    }
    Ok(())
}
