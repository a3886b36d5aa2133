//! Bidirectional message channel to a rendezvous server
//!
//! Runs as its own task: one loop owns the WebSocket connection and
//! multiplexes outgoing sends against inbound frames, handing inbound
//! [`ServerMessage`]s to the caller through a broadcast-style queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::protocol::{ClientMessage, ServerMessage};
use crate::error::NetworkError;
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default time [`SignalingClient::receive`] waits for the next server
/// message before giving up (spec `signaling.waitForMessage`).
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

enum Command {
    Send(ClientMessage, oneshot::Sender<Result<()>>),
    Recv(u64, oneshot::Sender<Result<ServerMessage>>),
    CancelRecv(u64),
}

/// Handle to a running signaling connection.
///
/// Cheaply `Clone`-able; every clone shares the same underlying socket task.
#[derive(Clone)]
pub struct SignalingClient {
    tx: mpsc::Sender<Command>,
    next_waiter_id: Arc<AtomicU64>,
}

impl SignalingClient {
    /// Connect to `url` (`ws://host:port/path` or `wss://...`) and spawn the
    /// connection-owning task.
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| NetworkError::SocketError(e.to_string()))?;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run(stream, rx));
        Ok(Self {
            tx,
            next_waiter_id: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Build a client directly from an already-established stream, mainly
    /// for tests that fake the transport.
    pub fn from_stream(stream: WsStream) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run(stream, rx));
        Self {
            tx,
            next_waiter_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Send a message to the server. Fails with [`NetworkError::NotConnected`]
    /// if the connection task has already exited.
    pub async fn send(&self, message: ClientMessage) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Send(message, reply_tx))
            .await
            .map_err(|_| NetworkError::NotConnected)?;
        reply_rx.await.map_err(|_| NetworkError::NotConnected)?
    }

    /// Wait for the next server message, up to [`DEFAULT_RECEIVE_TIMEOUT`].
    pub async fn receive(&self) -> Result<ServerMessage> {
        self.receive_within(DEFAULT_RECEIVE_TIMEOUT).await
    }

    /// Wait for the next server message, up to `timeout`.
    pub async fn receive_within(&self, timeout: Duration) -> Result<ServerMessage> {
        let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Recv(waiter_id, reply_tx))
            .await
            .map_err(|_| NetworkError::NotConnected)?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NetworkError::NotConnected),
            Err(_) => {
                let _ = self.tx.send(Command::CancelRecv(waiter_id)).await;
                Err(NetworkError::Timeout)
            }
        }
    }
}

async fn run(mut stream: WsStream, mut rx: mpsc::Receiver<Command>) {
    let mut pending_recv: Vec<(u64, oneshot::Sender<Result<ServerMessage>>)> = Vec::new();

    loop {
        tokio::select! {
            command = rx.recv() => {
                match command {
                    Some(Command::Send(msg, reply)) => {
                        let result = send_one(&mut stream, msg).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Recv(id, reply)) => {
                        pending_recv.push((id, reply));
                    }
                    Some(Command::CancelRecv(id)) => {
                        pending_recv.retain(|(pending_id, _)| *pending_id != id);
                    }
                    None => break,
                }
            }
            frame = stream.next(), if !pending_recv.is_empty() => {
                let (_, waiter) = pending_recv.remove(0);
                let _ = waiter.send(decode_frame(frame));
            }
        }
    }
}

async fn send_one(stream: &mut WsStream, msg: ClientMessage) -> Result<()> {
    let text = serde_json::to_string(&msg).map_err(|e| NetworkError::DecodeError(e.to_string()))?;
    stream
        .send(WsMessage::Text(text))
        .await
        .map_err(|e| NetworkError::SocketError(e.to_string()))
}

fn decode_frame(
    frame: Option<std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>,
) -> Result<ServerMessage> {
    match frame {
        Some(Ok(WsMessage::Text(text))) => {
            serde_json::from_str(&text).map_err(|e| NetworkError::DecodeError(e.to_string()))
        }
        Some(Ok(_)) => Err(NetworkError::DecodeError("non-text frame".into())),
        Some(Err(e)) => Err(NetworkError::SocketError(e.to_string())),
        None => Err(NetworkError::NotConnected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_frame_rejects_binary() {
        let frame = Some(Ok(WsMessage::Binary(vec![1, 2, 3])));
        assert!(matches!(decode_frame(frame), Err(NetworkError::DecodeError(_))));
    }

    #[test]
    fn decode_frame_reports_not_connected_on_close() {
        assert!(matches!(decode_frame(None), Err(NetworkError::NotConnected)));
    }

    #[test]
    fn decode_frame_parses_registered() {
        let frame = Some(Ok(WsMessage::Text(
            r#"{"type":"registered","serverTime":1234}"#.to_string(),
        )));
        let decoded = decode_frame(frame).unwrap();
        assert_eq!(decoded, ServerMessage::Registered { server_time: 1234 });
    }
}
