//! Run parameters.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::BenchError;

/// Parameters of one load-test run.
#[derive(Clone, Debug)]
pub struct BenchConfig {
    /// Number of simulated clients.
    pub clients: usize,
    /// Messages sent by each client.
    pub messages: usize,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Upgrade endpoint path.
    pub path: String,
    /// Label of the server under test, used in the report file name.
    pub server: String,
    /// Directory the report is written to.
    pub output_dir: PathBuf,
    /// How long to wait for the envelope following a send.
    pub read_timeout: Duration,
    /// Send attempts per message.
    pub max_retries: usize,
    /// Pause after a failed reconnect.
    pub retry_backoff: Duration,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            clients: 10,
            messages: 100,
            host: "localhost".into(),
            port: 8080,
            path: "/ws".into(),
            server: "rust".into(),
            output_dir: PathBuf::from("metrics"),
            read_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl BenchConfig {
    /// WebSocket URL of the server under test.
    pub fn url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.path)
    }

    /// `results-client-<server>-<clients>-messages-<messages>.json`
    pub fn report_file_name(&self) -> String {
        format!(
            "results-client-{}-{}-messages-{}.json",
            self.server, self.clients, self.messages
        )
    }

    /// Reject parameters under which no message could ever be sent.
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.max_retries == 0 {
            return Err(BenchError::InvalidConfig(
                "max_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Full path of the report file.
    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(self.report_file_name())
    }
}
