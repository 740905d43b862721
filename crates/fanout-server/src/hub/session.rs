//! Session handler: one peer's lifecycle from upgrade to teardown.
//!
//! `Upgrading → Active → Draining → Closed`. The upgrade itself happens in the
//! HTTP layer; a failed upgrade never reaches this module.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use fanout_core::Envelope;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, warn};

use super::Hub;
use super::queue::Origin;
use crate::metrics::{
    CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL,
};

/// Bound on flushing already-buffered frames once a connection is closing.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Protocol upgrade in progress.
    Upgrading,
    /// Registered; reading envelopes.
    Active,
    /// Read loop ended; leaving the registry.
    Draining,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Upgrading => "upgrading",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Closed => "closed",
        })
    }
}

/// Why a session left `Active`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrainReason {
    /// Peer sent a close frame.
    PeerClosed,
    /// The stream ended without a close frame.
    StreamEnded,
    /// Transport error while reading.
    Transport(String),
    /// A frame that is not a valid envelope.
    Malformed(String),
    /// The handle was closed by the distributor or by shutdown.
    HandleClosed,
}

impl fmt::Display for DrainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Malformed(e) => write!(f, "malformed envelope: {e}"),
            Self::HandleClosed => f.write_str("connection closed by hub"),
        }
    }
}

#[derive(Debug)]
enum Inbound {
    Envelope(Envelope),
    Ignore,
    Drain(DrainReason),
}

fn classify(frame: Option<Result<Message, axum::Error>>) -> Inbound {
    let msg = match frame {
        None => return Inbound::Drain(DrainReason::StreamEnded),
        Some(Err(error)) => return Inbound::Drain(DrainReason::Transport(error.to_string())),
        Some(Ok(msg)) => msg,
    };
    let parsed = match &msg {
        Message::Text(text) => Envelope::from_frame(text.as_str()),
        Message::Binary(data) => match std::str::from_utf8(data) {
            Ok(text) => Envelope::from_frame(text),
            Err(error) => return Inbound::Drain(DrainReason::Malformed(error.to_string())),
        },
        Message::Ping(_) | Message::Pong(_) => return Inbound::Ignore,
        Message::Close(_) => return Inbound::Drain(DrainReason::PeerClosed),
    };
    match parsed {
        Ok(envelope) => Inbound::Envelope(envelope),
        Err(error) => Inbound::Drain(DrainReason::Malformed(error.to_string())),
    }
}

/// Drive one upgraded connection until it drains, then announce its departure.
#[instrument(skip_all, fields(conn_id = tracing::field::Empty, peer = %peer_addr))]
pub async fn run_session(socket: WebSocket, peer_addr: SocketAddr, hub: Arc<Hub>) {
    let (handle, outbound_rx) = hub.open_connection(peer_addr);
    let _ = Span::current().record("conn_id", tracing::field::display(handle.id()));

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_outbound(sink, outbound_rx, handle.close_token()));

    hub.registry().register(handle.clone()).await;
    info!(state = %SessionState::Active, "client connected");
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
    if let Err(error) = hub.publish(Origin::Hub, Envelope::join()).await {
        debug!(%error, "join notice not queued");
    }

    let origin = Origin::Connection(handle.id().clone());
    let stamp = hub.settings().stamp_sender;
    let reason = loop {
        let next = tokio::select! {
            biased;
            () = handle.closed() => break DrainReason::HandleClosed,
            next = stream.next() => next,
        };
        match classify(next) {
            Inbound::Envelope(envelope) => {
                let envelope = if stamp {
                    envelope.with_sender(handle.id().as_str())
                } else {
                    envelope
                };
                if let Err(error) = hub.publish(origin.clone(), envelope).await {
                    debug!(%error, "inbound envelope not queued");
                }
            }
            Inbound::Ignore => {}
            Inbound::Drain(reason) => break reason,
        }
    };

    info!(state = %SessionState::Draining, %reason, "client disconnecting");
    let _ = hub.registry().unregister(handle.id()).await;
    handle.close();
    if let Err(error) = writer.await {
        warn!(%error, "writer task failed");
    }

    let age = handle.age();
    info!(
        state = %SessionState::Closed,
        duration_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
        delivered = handle.delivered_count(),
        failed = handle.failure_count(),
        "client disconnected"
    );
    counter!(DISCONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(CONNECTION_DURATION_SECONDS).record(age.as_secs_f64());
    if let Err(error) = hub.publish(Origin::Hub, Envelope::leave()).await {
        debug!(%error, "leave notice not queued");
    }
}

/// Forward outbound frames to the socket until the handle closes.
///
/// A failed socket write closes the handle. On close, frames already buffered
/// are flushed (bounded by [`FLUSH_TIMEOUT`]) before the close frame.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<str>>,
    close: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = close.cancelled() => break,
            frame = rx.recv() => frame,
        };
        let Some(frame) = frame else { break };
        // a peer that stops reading can stall the send indefinitely
        let sent = tokio::select! {
            biased;
            () = close.cancelled() => break,
            sent = sink.send(text(&frame)) => sent,
        };
        if let Err(error) = sent {
            debug!(%error, "socket write failed");
            close.cancel();
            return;
        }
    }

    rx.close();
    let flush = async {
        while let Some(frame) = rx.recv().await {
            if let Err(error) = sink.send(text(&frame)).await {
                return Err(error);
            }
        }
        sink.send(Message::Close(None)).await
    };
    match tokio::time::timeout(FLUSH_TIMEOUT, flush).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => debug!(%error, "flush on close failed"),
        Err(_) => debug!("flush on close timed out"),
    }
}

fn text(frame: &str) -> Message {
    Message::Text(frame.to_owned().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn text_frame_is_parsed() {
        let inbound = classify(Some(Ok(text(r#"{"sender":"x","content":"hi"}"#))));
        assert_matches!(inbound, Inbound::Envelope(env) if env.content.as_deref() == Some("hi"));
    }

    #[test]
    fn rfc3339_iat_keeps_the_connection() {
        let frame = text(
            r#"{"sender":"Client_1","id":"6f1c","content":"Message 1 from Client_1","iat":"2024-06-10T12:00:00.123456789Z","type":"message"}"#,
        );
        assert_matches!(
            classify(Some(Ok(frame))),
            Inbound::Envelope(env) if env.iat.is_some() && env.id.as_deref() == Some("6f1c")
        );
    }

    #[test]
    fn odd_iat_type_keeps_the_connection() {
        let frame = text(r#"{"content":"hi","iat":{"seconds":1},"id":7}"#);
        assert_matches!(
            classify(Some(Ok(frame))),
            Inbound::Envelope(env) if env.iat.is_none() && env.id.is_none()
        );
    }

    #[test]
    fn utf8_binary_frame_is_parsed() {
        let frame = Message::Binary(br#"{"content":"bin"}"#.to_vec().into());
        assert_matches!(
            classify(Some(Ok(frame))),
            Inbound::Envelope(env) if env.content.as_deref() == Some("bin")
        );
    }

    #[test]
    fn non_utf8_binary_drains() {
        let frame = Message::Binary(vec![0xff, 0xfe].into());
        assert_matches!(
            classify(Some(Ok(frame))),
            Inbound::Drain(DrainReason::Malformed(_))
        );
    }

    #[test]
    fn malformed_text_drains() {
        assert_matches!(
            classify(Some(Ok(text("not json")))),
            Inbound::Drain(DrainReason::Malformed(_))
        );
    }

    #[test]
    fn control_frames_are_ignored() {
        assert_matches!(
            classify(Some(Ok(Message::Ping(Vec::new().into())))),
            Inbound::Ignore
        );
        assert_matches!(
            classify(Some(Ok(Message::Pong(Vec::new().into())))),
            Inbound::Ignore
        );
    }

    #[test]
    fn close_and_end_of_stream_drain() {
        assert_matches!(
            classify(Some(Ok(Message::Close(None)))),
            Inbound::Drain(DrainReason::PeerClosed)
        );
        assert_matches!(classify(None), Inbound::Drain(DrainReason::StreamEnded));
    }

    #[test]
    fn transport_error_drains() {
        let error = axum::Error::new(std::io::Error::other("reset"));
        assert_matches!(
            classify(Some(Err(error))),
            Inbound::Drain(DrainReason::Transport(msg)) if msg.contains("reset")
        );
    }

    #[test]
    fn state_names() {
        assert_eq!(SessionState::Upgrading.to_string(), "upgrading");
        assert_eq!(SessionState::Closed.to_string(), "closed");
        assert_eq!(DrainReason::PeerClosed.to_string(), "peer closed");
    }
}
