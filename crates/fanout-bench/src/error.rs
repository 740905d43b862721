//! Harness error types.

use std::path::PathBuf;
use std::time::Duration;

use fanout_core::EnvelopeError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors raised by the harness.
///
/// Connection-level variants are recovered per message by the client loop;
/// report variants abort the run.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Dial, send or read failed at the WebSocket layer.
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),

    /// The run parameters cannot produce a meaningful run.
    #[error("invalid benchmark config: {0}")]
    InvalidConfig(String),

    /// No connection is currently open.
    #[error("not connected")]
    NotConnected,

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,

    /// No envelope arrived in time.
    #[error("no response within {0:?}")]
    ReadTimeout(Duration),

    /// A received frame was not a valid envelope.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Report (de)serialization failed.
    #[error("report JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or writing the report failed.
    #[error("{action} {}: {source}", path.display())]
    Io {
        /// What was being attempted.
        action: &'static str,
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl From<tungstenite::Error> for BenchError {
    fn from(error: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(error))
    }
}
