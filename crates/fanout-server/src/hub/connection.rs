//! Live connection handle shared by the registry, the distribution loop and
//! the owning session.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Stable identity issued to a connection when it is accepted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Issue a fresh id.
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// String form, as stamped into envelope `sender` fields.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a frame could not be handed to a connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection's writer is gone or the handle was closed.
    #[error("connection closed")]
    Closed,
    /// The outbound buffer stayed full for the whole write timeout.
    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
}

/// A connected peer as seen by the hub.
///
/// Frames are written through a bounded channel drained by the session's
/// writer task, which owns the socket sink. Closing the handle cancels its
/// token, which stops both the writer and the session's receive loop.
pub struct ConnectionHandle {
    id: ConnectionId,
    peer_addr: SocketAddr,
    connected_at: Instant,
    tx: mpsc::Sender<Arc<str>>,
    close: CancellationToken,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound channel.
    pub fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        buffer: usize,
        close: CancellationToken,
    ) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = Self {
            id,
            peer_addr,
            connected_at: Instant::now(),
            tx,
            close,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        };
        (handle, rx)
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Transport-level peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Hand one serialized frame to the connection's writer.
    ///
    /// Waits up to `timeout` for buffer space.
    pub async fn deliver(&self, frame: Arc<str>, timeout: Duration) -> Result<(), DeliveryError> {
        if self.close.is_cancelled() {
            let _ = self.failed.fetch_add(1, Ordering::Relaxed);
            return Err(DeliveryError::Closed);
        }
        let result = match tokio::time::timeout(timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::Closed),
            Err(_) => Err(DeliveryError::TimedOut(timeout)),
        };
        let counter = if result.is_ok() {
            &self.delivered
        } else {
            &self.failed
        };
        let _ = counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Release transport resources. Idempotent.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once the handle is closed.
    pub async fn closed(&self) {
        self.close.cancelled().await;
    }

    /// Token cancelled when the handle closes.
    pub fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }

    /// Frames successfully handed to the writer.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Failed delivery attempts.
    pub fn failure_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
