//! The hub: connection registry, broadcast queue, distribution loop and
//! per-connection sessions.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Connection id and handle (outbound channel, close token) |
//! | `registry` | Lock-guarded set of live connections |
//! | `queue` | Pending-broadcast queue (unbounded or bounded with a policy) |
//! | `distributor` | Single consumer that fans envelopes out |
//! | `session` | Per-connection lifecycle from upgrade to teardown |
//!
//! ## Data Flow
//!
//! `session` → `queue` → `distributor` → `registry` snapshot → each
//! `connection`'s writer.

pub mod connection;
pub mod distributor;
pub mod queue;
pub mod registry;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fanout_core::Envelope;
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{OverflowPolicy, ServerConfig};
use crate::metrics::{ENVELOPES_DROPPED_TOTAL, ENVELOPES_ENQUEUED_TOTAL};
use connection::{ConnectionHandle, ConnectionId};
use distributor::Distributor;
use queue::{Origin, QueueError, QueueSender, QueuedEnvelope};
use registry::ConnectionRegistry;

/// Hub tuning, derived from [`ServerConfig`].
#[derive(Clone, Debug)]
pub struct HubSettings {
    /// Per-connection outbound buffer.
    pub outbound_buffer: usize,
    /// Max wait for a single delivery.
    pub write_timeout: Duration,
    /// Broadcast queue bound; `None` is unbounded.
    pub queue_capacity: Option<usize>,
    /// Full-queue behavior.
    pub overflow_policy: OverflowPolicy,
    /// Replace client-supplied senders with the connection id.
    pub stamp_sender: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for HubSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            outbound_buffer: config.outbound_buffer,
            write_timeout: config.write_timeout(),
            queue_capacity: config.queue_capacity,
            overflow_policy: config.overflow_policy,
            stamp_sender: config.stamp_sender,
        }
    }
}

/// Running totals shared between the hub and its distribution loop.
#[derive(Debug, Default)]
pub struct HubCounters {
    enqueued: AtomicU64,
    distributed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time hub statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Registered connections.
    pub connections: usize,
    /// Envelopes accepted onto the queue.
    pub enqueued: u64,
    /// Envelopes the distribution loop has fanned out.
    pub distributed: u64,
    /// Envelopes rejected by a full or closed queue.
    pub dropped: u64,
}

/// Process-wide broadcast hub. Construct once and pass it to whatever needs it.
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    queue: QueueSender,
    settings: HubSettings,
    counters: Arc<HubCounters>,
    connections: CancellationToken,
}

impl Hub {
    /// Build the hub and its distribution loop.
    ///
    /// The caller spawns [`Distributor::run`]. Cancelling `cancel` makes the
    /// loop drain the queue and stop; open connections are closed separately
    /// with [`disconnect_all`](Self::disconnect_all).
    pub fn new(settings: HubSettings, cancel: CancellationToken) -> (Arc<Self>, Distributor) {
        let registry = Arc::new(ConnectionRegistry::new());
        let counters = Arc::new(HubCounters::default());
        let (queue, queue_rx) = queue::channel(settings.queue_capacity, settings.overflow_policy);

        let distributor = Distributor {
            queue: queue_rx,
            registry: registry.clone(),
            write_timeout: settings.write_timeout,
            counters: counters.clone(),
            cancel,
        };
        let hub = Arc::new(Self {
            registry,
            queue,
            settings,
            counters,
            connections: CancellationToken::new(),
        });
        (hub, distributor)
    }

    /// The live connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Hub settings.
    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    /// Create a handle for a newly upgraded connection. Not yet registered.
    pub fn open_connection(
        &self,
        peer_addr: SocketAddr,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<Arc<str>>) {
        let (handle, rx) = ConnectionHandle::new(
            ConnectionId::new(),
            peer_addr,
            self.settings.outbound_buffer,
            self.connections.child_token(),
        );
        (Arc::new(handle), rx)
    }

    /// Queue an envelope for fan-out.
    pub async fn publish(&self, origin: Origin, envelope: Envelope) -> Result<(), QueueError> {
        let kind = envelope.kind().to_string();
        match self.queue.enqueue(QueuedEnvelope { origin, envelope }).await {
            Ok(()) => {
                let _ = self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                counter!(ENVELOPES_ENQUEUED_TOTAL, "kind" => kind).increment(1);
                Ok(())
            }
            Err(error) => {
                let _ = self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(ENVELOPES_DROPPED_TOTAL).increment(1);
                match error {
                    QueueError::Full => warn!(%kind, "broadcast queue full, envelope dropped"),
                    QueueError::Closed => debug!(%kind, "broadcast queue closed, envelope dropped"),
                }
                Err(error)
            }
        }
    }

    /// Close every open connection, current and future handles alike.
    pub fn disconnect_all(&self) {
        self.connections.cancel();
    }

    /// Current statistics.
    pub async fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len().await,
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            distributed: self.counters.distributed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[test]
    fn settings_follow_config() {
        let config = ServerConfig {
            outbound_buffer: 7,
            write_timeout_ms: 250,
            queue_capacity: Some(3),
            overflow_policy: OverflowPolicy::DropNewest,
            stamp_sender: false,
            ..ServerConfig::default()
        };
        let settings = HubSettings::from(&config);
        assert_eq!(settings.outbound_buffer, 7);
        assert_eq!(settings.write_timeout, Duration::from_millis(250));
        assert_eq!(settings.queue_capacity, Some(3));
        assert!(!settings.stamp_sender);
    }

    #[tokio::test]
    async fn publish_then_distribute() {
        let cancel = CancellationToken::new();
        let (hub, distributor) = Hub::new(HubSettings::default(), cancel.clone());
        let task = tokio::spawn(distributor.run());

        let (handle, mut rx) = hub.open_connection(addr());
        hub.registry().register(handle).await;
        hub.publish(Origin::Hub, Envelope::join()).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(Envelope::from_frame(&frame).unwrap().is_lifecycle());

        cancel.cancel();
        task.await.unwrap();

        let stats = hub.stats().await;
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.distributed, 1);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_rejected() {
        let cancel = CancellationToken::new();
        let (hub, distributor) = Hub::new(HubSettings::default(), cancel.clone());
        cancel.cancel();
        distributor.run().await;

        assert_matches!(
            hub.publish(Origin::Hub, Envelope::leave()).await,
            Err(QueueError::Closed)
        );
        assert_eq!(hub.stats().await.dropped, 1);
    }

    #[tokio::test]
    async fn disconnect_all_closes_open_handles() {
        let (hub, _distributor) = Hub::new(HubSettings::default(), CancellationToken::new());
        let (a, _rx_a) = hub.open_connection(addr());
        let (b, _rx_b) = hub.open_connection(addr());
        assert_ne!(a.id(), b.id());

        hub.disconnect_all();
        assert!(a.is_closed());
        assert!(b.is_closed());
    }
}
