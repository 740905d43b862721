//! One simulated client: connect, then send and time each message in turn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fanout_core::Envelope;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, instrument, warn};

use crate::config::BenchConfig;
use crate::error::BenchError;
use crate::stats::{ClientReport, Timing};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Id of the `n`-th client (1-based).
pub fn client_id(n: usize) -> String {
    format!("Client_{n}")
}

/// Content of the `n`-th message (1-based) sent by `client_id`.
pub fn message_content(n: usize, client_id: &str) -> String {
    format!("Message {n} from {client_id}")
}

/// A re-dialable WebSocket connection.
pub struct Connection {
    url: String,
    ws: Option<WsStream>,
}

impl Connection {
    /// Dial `url`.
    pub async fn connect(url: &str) -> Result<Self, BenchError> {
        let (ws, _) = connect_async(url).await?;
        Ok(Self {
            url: url.to_owned(),
            ws: Some(ws),
        })
    }

    /// Send one text frame.
    pub async fn send(&mut self, frame: &str) -> Result<(), BenchError> {
        let ws = self.ws.as_mut().ok_or(BenchError::NotConnected)?;
        ws.send(Message::text(frame.to_owned())).await?;
        Ok(())
    }

    /// Next envelope, skipping control frames.
    pub async fn next_envelope(&mut self, timeout: Duration) -> Result<Envelope, BenchError> {
        let ws = self.ws.as_mut().ok_or(BenchError::NotConnected)?;
        let read = async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Envelope::from_frame(&text).map_err(BenchError::from);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let text = String::from_utf8_lossy(&data);
                        return Envelope::from_frame(&text).map_err(BenchError::from);
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(BenchError::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return Err(BenchError::from(error)),
                }
            }
        };
        tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| BenchError::ReadTimeout(timeout))?
    }

    /// Drop the current socket and dial again.
    pub async fn reconnect(&mut self) -> Result<(), BenchError> {
        if let Some(mut ws) = self.ws.take() {
            let _ = ws.close(None).await;
        }
        let (ws, _) = connect_async(self.url.as_str()).await?;
        self.ws = Some(ws);
        Ok(())
    }

    /// Close the socket, if open.
    pub async fn close(mut self) {
        if let Some(mut ws) = self.ws.take() {
            let _ = ws.close(None).await;
        }
    }
}

/// Send `frame`, re-dialing between attempts. Returns whether it went out.
async fn send_with_retry(conn: &mut Connection, frame: &str, config: &BenchConfig) -> bool {
    for attempt in 1..=config.max_retries {
        let Err(error) = conn.send(frame).await else {
            return true;
        };
        warn!(attempt, %error, "error sending message");
        if let Err(error) = conn.reconnect().await {
            warn!(%error, "error reconnecting");
            tokio::time::sleep(config.retry_backoff).await;
        }
    }
    false
}

/// Drive one client through `config.messages` messages.
///
/// Returns `None` if the first connection attempt fails. A message whose send
/// exhausts its retries, or whose response read fails, is dropped without a
/// timing; a failed read also re-dials.
#[instrument(skip(config))]
pub async fn simulate_client(client_id: String, config: Arc<BenchConfig>) -> Option<ClientReport> {
    let mut conn = match Connection::connect(&config.url()).await {
        Ok(conn) => conn,
        Err(error) => {
            warn!(%error, "error connecting");
            return None;
        }
    };
    info!("client connected");

    let mut timings = Vec::with_capacity(config.messages);
    for n in 1..=config.messages {
        let started = Instant::now();
        let envelope = Envelope::message(&client_id, message_content(n, &client_id));
        let frame = match envelope.to_frame() {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "failed to encode message");
                continue;
            }
        };

        if !send_with_retry(&mut conn, &frame, &config).await {
            warn!(message = n, "failed to send message after retries");
            continue;
        }

        match conn.next_envelope(config.read_timeout).await {
            Ok(response) => timings.push(Timing {
                message_id: response.id.unwrap_or_default(),
                time: started.elapsed().as_secs_f64() * 1000.0,
                client_id: client_id.clone(),
            }),
            Err(error) => {
                warn!(message = n, %error, "error reading response");
                if let Err(error) = conn.reconnect().await {
                    warn!(%error, "error reconnecting");
                }
            }
        }
    }

    conn.close().await;
    debug!(timings = timings.len(), "all messages sent");
    Some(ClientReport::from_timings(client_id, timings))
}
