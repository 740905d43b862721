//! # fanout-bench
//!
//! Load-test harness for a fan-out WebSocket server.
//!
//! Opens many concurrent client connections, sends timestamped envelopes on
//! each, measures the time until the next envelope arrives on the same
//! connection and writes per-client latency statistics as JSON.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod report;
pub mod stats;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

pub use config::BenchConfig;
pub use error::BenchError;
pub use stats::{ClientReport, Results, Timing};

/// Run every simulated client concurrently and write the report.
///
/// Returns the report path and the aggregated results. Only clients that
/// managed to connect appear in the results.
pub async fn run(config: BenchConfig) -> Result<(PathBuf, Results), BenchError> {
    config.validate()?;
    let config = Arc::new(config);
    info!(
        clients = config.clients,
        messages = config.messages,
        url = %config.url(),
        "starting load test"
    );

    let tasks: Vec<_> = (1..=config.clients)
        .map(|i| {
            let config = config.clone();
            tokio::spawn(client::simulate_client(client::client_id(i), config))
        })
        .collect();

    let mut results = Results::new();
    for task in futures::future::join_all(tasks).await {
        match task {
            Ok(Some(report)) => {
                let _ = results.insert(report.client_id.clone(), report);
            }
            Ok(None) => {}
            Err(error) => warn!(%error, "client task failed"),
        }
    }

    info!("calculating overall averages");
    let path = report::write_report(&config.output_dir, &config.report_file_name(), &results)?;
    info!(path = %path.display(), clients = results.len(), "results written");
    Ok((path, results))
}
