//! UDP transport: bind, send/recv, dispatch to a handler
//!
//! Receive delivery is FIFO from the kernel socket; this layer must not
//! reorder datagrams. Demuxing between probes and envelopes happens one
//! layer up (in [`crate::facade`]), which only needs the magic-byte
//! fast-path check in [`crate::probe::Probe::is_hole_punch_probe`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::NetworkError;
use crate::Result;

/// A datagram along with the address it arrived from.
pub type Datagram = (Vec<u8>, SocketAddr);

/// Handler invoked for every received datagram, on the transport's receive
/// loop task.
pub type ReceiveHandler = Arc<dyn Fn(Vec<u8>, SocketAddr) + Send + Sync>;

/// A bound UDP socket with a background receive loop dispatching to a
/// caller-supplied handler.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    bound_port: u16,
    recv_task: Option<JoinHandle<()>>,
    shutdown: Arc<Notify>,
}

impl UdpTransport {
    /// Bind a UDP socket on `port` (0 = OS-chosen).
    pub async fn bind(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        let bound_port = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?
            .port();
        Ok(Self {
            socket: Arc::new(socket),
            bound_port,
            recv_task: None,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// The locally bound port (useful when `bind(0)` let the OS choose).
    pub fn bound_port(&self) -> u16 {
        self.bound_port
    }

    /// A cheap clone of the underlying socket handle, for components (like
    /// [`crate::probe_engine::ProbeEngine`]) that need to send datagrams
    /// directly without going through the handler dispatch loop.
    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    /// Send bytes to `endpoint`.
    pub async fn send(&self, bytes: &[u8], endpoint: SocketAddr) -> Result<usize> {
        self.socket
            .send_to(bytes, endpoint)
            .await
            .map_err(|e| NetworkError::SocketError(e.to_string()))
    }

    /// Start the background receive loop, dispatching every datagram to
    /// `handler` in arrival order. Replaces any previously installed
    /// handler/loop.
    pub fn on_receive(&mut self, handler: ReceiveHandler) {
        self.stop_receive_loop();
        let socket = self.socket.clone();
        let shutdown = self.shutdown.clone();
        self.recv_task = Some(tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, from)) => handler(buf[..len].to_vec(), from),
                            Err(e) => {
                                tracing::warn!("UDP recv error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        }));
    }

    fn stop_receive_loop(&mut self) {
        if let Some(task) = self.recv_task.take() {
            self.shutdown.notify_one();
            task.abort();
        }
    }

    /// Stop the receive loop and release the socket.
    pub fn close(&mut self) {
        self.stop_receive_loop();
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.stop_receive_loop();
    }
}
