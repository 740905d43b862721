//! Pending-broadcast queue: many producers (sessions), one consumer
//! (the distribution loop).
//!
//! Unbounded by default. A bound can be configured together with an
//! [`OverflowPolicy`].

use fanout_core::Envelope;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::connection::ConnectionId;
use crate::config::OverflowPolicy;

/// Where a queued envelope came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Emitted by the hub itself (join/leave notices).
    Hub,
    /// Read from a peer connection.
    Connection(ConnectionId),
}

impl Origin {
    /// Whether the envelope must be withheld from `id`.
    pub fn excludes(&self, id: &ConnectionId) -> bool {
        matches!(self, Self::Connection(origin) if origin == id)
    }
}

/// An envelope waiting for fan-out.
#[derive(Clone, Debug)]
pub struct QueuedEnvelope {
    /// Producer of the envelope.
    pub origin: Origin,
    /// The envelope itself.
    pub envelope: Envelope,
}

/// Enqueue failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The distribution loop has stopped accepting envelopes.
    #[error("broadcast queue is closed")]
    Closed,
    /// The queue is at capacity and the policy drops new envelopes.
    #[error("broadcast queue is full")]
    Full,
}

#[derive(Clone)]
enum SenderInner {
    Unbounded(mpsc::UnboundedSender<QueuedEnvelope>),
    Bounded(mpsc::Sender<QueuedEnvelope>, OverflowPolicy),
}

/// Producer side, cloned into every session.
#[derive(Clone)]
pub struct QueueSender {
    inner: SenderInner,
}

enum ReceiverInner {
    Unbounded(mpsc::UnboundedReceiver<QueuedEnvelope>),
    Bounded(mpsc::Receiver<QueuedEnvelope>),
}

/// Consumer side, owned by the distribution loop.
pub struct QueueReceiver {
    inner: ReceiverInner,
}

/// Create a queue; `capacity` of `None` means unbounded.
pub fn channel(capacity: Option<usize>, policy: OverflowPolicy) -> (QueueSender, QueueReceiver) {
    match capacity {
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                QueueSender {
                    inner: SenderInner::Unbounded(tx),
                },
                QueueReceiver {
                    inner: ReceiverInner::Unbounded(rx),
                },
            )
        }
        Some(cap) => {
            let (tx, rx) = mpsc::channel(cap.max(1));
            (
                QueueSender {
                    inner: SenderInner::Bounded(tx, policy),
                },
                QueueReceiver {
                    inner: ReceiverInner::Bounded(rx),
                },
            )
        }
    }
}

impl QueueSender {
    /// Append an envelope to the queue.
    pub async fn enqueue(&self, item: QueuedEnvelope) -> Result<(), QueueError> {
        match &self.inner {
            SenderInner::Unbounded(tx) => tx.send(item).map_err(|_| QueueError::Closed),
            SenderInner::Bounded(tx, OverflowPolicy::Block) => {
                tx.send(item).await.map_err(|_| QueueError::Closed)
            }
            SenderInner::Bounded(tx, OverflowPolicy::DropNewest) => {
                tx.try_send(item).map_err(|e| match e {
                    TrySendError::Full(_) => QueueError::Full,
                    TrySendError::Closed(_) => QueueError::Closed,
                })
            }
        }
    }

    /// Whether the consumer has closed or dropped the queue.
    pub fn is_closed(&self) -> bool {
        match &self.inner {
            SenderInner::Unbounded(tx) => tx.is_closed(),
            SenderInner::Bounded(tx, _) => tx.is_closed(),
        }
    }
}

impl QueueReceiver {
    /// Next envelope in FIFO order; `None` once closed and empty.
    pub async fn recv(&mut self) -> Option<QueuedEnvelope> {
        match &mut self.inner {
            ReceiverInner::Unbounded(rx) => rx.recv().await,
            ReceiverInner::Bounded(rx) => rx.recv().await,
        }
    }

    /// Refuse new envelopes; those already queued can still be received.
    pub fn close(&mut self) {
        match &mut self.inner {
            ReceiverInner::Unbounded(rx) => rx.close(),
            ReceiverInner::Bounded(rx) => rx.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn item(content: &str) -> QueuedEnvelope {
        QueuedEnvelope {
            origin: Origin::Hub,
            envelope: Envelope {
                content: Some(content.into()),
                ..Envelope::default()
            },
        }
    }

    fn content(item: &QueuedEnvelope) -> &str {
        item.envelope.content.as_deref().unwrap_or_default()
    }

    #[test]
    fn origin_exclusion() {
        let me = ConnectionId::from("c1");
        let other = ConnectionId::from("c2");
        assert!(Origin::Connection(me.clone()).excludes(&me));
        assert!(!Origin::Connection(me).excludes(&other));
        assert!(!Origin::Hub.excludes(&other));
    }

    #[tokio::test]
    async fn unbounded_is_fifo_across_producers() {
        let (tx, mut rx) = channel(None, OverflowPolicy::Block);
        let tx2 = tx.clone();
        tx.enqueue(item("e1")).await.unwrap();
        tx2.enqueue(item("e2")).await.unwrap();
        tx.enqueue(item("e3")).await.unwrap();

        assert_eq!(content(&rx.recv().await.unwrap()), "e1");
        assert_eq!(content(&rx.recv().await.unwrap()), "e2");
        assert_eq!(content(&rx.recv().await.unwrap()), "e3");
    }

    #[tokio::test]
    async fn drop_newest_rejects_when_full() {
        let (tx, mut rx) = channel(Some(1), OverflowPolicy::DropNewest);
        tx.enqueue(item("kept")).await.unwrap();
        assert_matches!(tx.enqueue(item("dropped")).await, Err(QueueError::Full));
        assert_eq!(content(&rx.recv().await.unwrap()), "kept");
    }

    #[tokio::test]
    async fn block_waits_for_space() {
        let (tx, mut rx) = channel(Some(1), OverflowPolicy::Block);
        tx.enqueue(item("first")).await.unwrap();

        let producer = tokio::spawn({
            let tx = tx.clone();
            async move { tx.enqueue(item("second")).await }
        });

        assert_eq!(content(&rx.recv().await.unwrap()), "first");
        producer.await.unwrap().unwrap();
        assert_eq!(content(&rx.recv().await.unwrap()), "second");
    }

    #[tokio::test]
    async fn close_drains_then_rejects() {
        let (tx, mut rx) = channel(None, OverflowPolicy::Block);
        tx.enqueue(item("pending")).await.unwrap();
        rx.close();

        assert!(tx.is_closed());
        assert_matches!(tx.enqueue(item("late")).await, Err(QueueError::Closed));
        assert_eq!(content(&rx.recv().await.unwrap()), "pending");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_closes_bounded_queue() {
        let (tx, rx) = channel(Some(4), OverflowPolicy::Block);
        drop(rx);
        assert_matches!(tx.enqueue(item("x")).await, Err(QueueError::Closed));
    }
}
