//! Ordered shutdown of the hub via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::hub::Hub;

/// How a shutdown ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownOutcome {
    /// The distribution loop drained the queue in time.
    pub queue_drained: bool,
    /// The HTTP server finished in time.
    pub server_stopped: bool,
}

/// Owns the server-wide token: cancelling it stops the accept loop and tells
/// the distribution loop to drain.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Shut down in order, each wait bounded by `timeout`:
    ///
    /// 1. Cancel the token (stop accepting, close the broadcast queue)
    /// 2. Wait for the distribution loop to deliver what was already queued
    /// 3. Close every open connection
    /// 4. Wait for the HTTP server task
    pub async fn graceful_shutdown(
        &self,
        hub: &Hub,
        distributor: Option<JoinHandle<()>>,
        server: Option<JoinHandle<()>>,
        timeout: Duration,
    ) -> ShutdownOutcome {
        self.shutdown();
        info!(timeout_secs = timeout.as_secs(), "shutting down");

        let queue_drained = match distributor {
            Some(task) => wait(task, timeout, "distribution loop").await,
            None => true,
        };

        hub.disconnect_all();

        let server_stopped = match server {
            Some(task) => wait(task, timeout, "http server").await,
            None => true,
        };

        ShutdownOutcome {
            queue_drained,
            server_stopped,
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait(task: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let abort = task.abort_handle();
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(())) => true,
        Ok(Err(error)) => {
            warn!(task = name, %error, "task failed during shutdown");
            true
        }
        Err(_) => {
            warn!(task = name, "shutdown timed out after {timeout:?}, aborting");
            abort.abort();
            false
        }
    }
}
