//! Execute a single hole-punch attempt under a chosen strategy
//!
//! Each attempt owns a short-lived UDP socket bound to the caller's local
//! port. Incoming probes are routed here from the transport's receive
//! handler via [`ProbeEngine::handle_incoming_probe`]; a session matches if
//! its expected remote PeerId prefix or target endpoint matches the
//! datagram's source.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::timeout;

use crate::error::NetworkError;
use crate::nat::types::Strategy;
use crate::probe::Probe;
use crate::Result;

/// Default number of probes sent per burst.
pub const DEFAULT_PROBE_COUNT: u32 = 5;
/// Default spacing between probes within a burst.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(200);
/// Default overall attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default number of response probes sent back on `responderFirst` success.
pub const DEFAULT_RESPONSE_PROBE_COUNT: u32 = 3;
/// Spacing between response probes.
const RESPONSE_PROBE_INTERVAL: Duration = Duration::from_millis(50);
/// `initiatorFirst` extends the base timeout by this factor.
const INITIATOR_FIRST_TIMEOUT_MULTIPLIER: f64 = 1.5;

/// Tuning parameters for [`ProbeEngine::execute`], mirroring
/// `mesh_store::config::HolePunchConfig`.
#[derive(Debug, Clone, Copy)]
pub struct ProbeTuning {
    /// Probes sent per burst.
    pub probe_count: u32,
    /// Spacing between probes within a burst.
    pub probe_interval: Duration,
    /// Overall attempt timeout.
    pub timeout: Duration,
    /// Whether `responderFirst` should send response probes back.
    pub send_response_probes: bool,
    /// Number of response probes to send.
    pub response_probe_count: u32,
}

impl Default for ProbeTuning {
    fn default() -> Self {
        Self {
            probe_count: DEFAULT_PROBE_COUNT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            send_response_probes: true,
            response_probe_count: DEFAULT_RESPONSE_PROBE_COUNT,
        }
    }
}

/// Outcome of a hole-punch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunchOutcome {
    /// Direct connectivity established.
    Success {
        /// The endpoint traffic is now flowing through.
        endpoint: SocketAddr,
        /// Approximate round-trip time in milliseconds, if measurable.
        rtt_ms: u64,
    },
    /// The attempt failed.
    Failed(NetworkError),
}

struct Session {
    remote_peer_prefix: String,
    target_endpoint: Option<SocketAddr>,
    tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    cancel: Arc<Notify>,
}

/// Dispatch table for in-flight sessions, shared with the transport's
/// receive handler via [`ProbeEngine::handle_incoming_probe`].
#[derive(Clone, Default)]
pub struct ProbeEngine {
    sessions: Arc<Mutex<HashMap<u64, Session>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
}

impl ProbeEngine {
    /// Create a fresh engine with no in-flight sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed an incoming probe datagram to whichever session(s) it matches.
    /// Called from the transport's receive handler for every datagram whose
    /// magic bytes identify it as a probe.
    pub async fn handle_incoming_probe(&self, source: SocketAddr, probe: Probe) {
        let sessions = self.sessions.lock().await;
        for session in sessions.values() {
            let matches = session.remote_peer_prefix == probe.sender_id()
                || session.target_endpoint == Some(source);
            if matches {
                let _ = session.tx.send((probe.encode().to_vec(), source));
            }
        }
    }

    /// Run one hole-punch attempt.
    ///
    /// `my_id` is this node's PeerId (used as the sender-id prefix in
    /// outgoing probes); `remote_peer_prefix` is the prefix we expect the
    /// remote's probes to carry.
    pub async fn execute(
        &self,
        my_id: &str,
        remote_peer_prefix: &str,
        target_endpoint: SocketAddr,
        strategy: Strategy,
        local_port: u16,
        tuning: ProbeTuning,
    ) -> PunchOutcome {
        let socket = match UdpSocket::bind(("0.0.0.0", local_port)).await {
            Ok(s) => Arc::new(s),
            Err(e) => return PunchOutcome::Failed(NetworkError::BindFailed(e.to_string())),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let session_id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let cancel = Arc::new(Notify::new());
        self.sessions.lock().await.insert(
            session_id,
            Session {
                remote_peer_prefix: remote_peer_prefix.to_string(),
                target_endpoint: Some(target_endpoint),
                tx: tx.clone(),
                cancel: cancel.clone(),
            },
        );

        // A session's own socket also feeds its channel directly, so an
        // attempt is self-sufficient even when nothing upstream demuxes
        // datagrams into `handle_incoming_probe` (e.g. a dedicated
        // punch-attempt port rather than the shared transport port).
        let recv_socket = socket.clone();
        let recv_task = tokio::spawn(async move {
            let mut buf = [0u8; 128];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((n, from)) if Probe::is_hole_punch_probe(&buf[..n]) => {
                        let _ = tx.send((buf[..n].to_vec(), from));
                    }
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        });

        let attempt = async {
            match strategy {
                Strategy::Simultaneous => {
                    self.run_simultaneous(socket.as_ref(), my_id, target_endpoint, tuning.timeout, &tuning, &mut rx)
                        .await
                }
                Strategy::InitiatorFirst => {
                    let extended = tuning.timeout.mul_f64(INITIATOR_FIRST_TIMEOUT_MULTIPLIER);
                    self.run_simultaneous(socket.as_ref(), my_id, target_endpoint, extended, &tuning, &mut rx)
                        .await
                }
                Strategy::ResponderFirst => {
                    self.run_responder_first(socket.as_ref(), my_id, tuning.timeout, &tuning, &mut rx)
                        .await
                }
            }
        };

        let outcome = tokio::select! {
            _ = cancel.notified() => PunchOutcome::Failed(NetworkError::Cancelled),
            result = attempt => result,
        };

        recv_task.abort();
        self.sessions.lock().await.remove(&session_id);
        outcome
    }

    /// Cancel a still-pending session by id. A no-op if it already
    /// completed; wakes the in-flight `execute()` call immediately rather
    /// than letting it run out its timeout.
    pub async fn cancel(&self, session_id: u64) {
        if let Some(session) = self.sessions.lock().await.remove(&session_id) {
            session.cancel.notify_one();
        }
    }

    /// Cancel every in-flight session attempting to reach `remote_peer_prefix`.
    pub async fn cancel_by_peer(&self, remote_peer_prefix: &str) {
        let matching: Vec<u64> = self
            .sessions
            .lock()
            .await
            .iter()
            .filter(|(_, session)| session.remote_peer_prefix == remote_peer_prefix)
            .map(|(id, _)| *id)
            .collect();
        for id in matching {
            self.cancel(id).await;
        }
    }

    async fn run_simultaneous(
        &self,
        socket: &UdpSocket,
        my_id: &str,
        target: SocketAddr,
        overall_timeout: Duration,
        tuning: &ProbeTuning,
        rx: &mut mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
    ) -> PunchOutcome {
        let send_started = now_ms();
        let sender = async {
            for seq in 0..tuning.probe_count {
                let probe = Probe::new(seq, now_ms(), my_id, false);
                let _ = socket.send_to(&probe.encode(), target).await;
                tokio::time::sleep(tuning.probe_interval).await;
            }
        };

        let receiver = async { rx.recv().await };

        tokio::pin!(sender);
        let wait = timeout(overall_timeout, async {
            tokio::select! {
                _ = &mut sender => {
                    // keep waiting for a reply after the burst finishes
                    receiver.await
                }
                result = receiver => result,
            }
        });

        match wait.await {
            Ok(Some((_, from))) => PunchOutcome::Success {
                endpoint: from,
                rtt_ms: now_ms().saturating_sub(send_started),
            },
            Ok(None) => PunchOutcome::Failed(NetworkError::SocketError("session channel closed".into())),
            Err(_) => PunchOutcome::Failed(NetworkError::Timeout),
        }
    }

    async fn run_responder_first(
        &self,
        socket: &UdpSocket,
        my_id: &str,
        overall_timeout: Duration,
        tuning: &ProbeTuning,
        rx: &mut mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
    ) -> PunchOutcome {
        let received_at = now_ms();
        let incoming = match timeout(overall_timeout, rx.recv()).await {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                return PunchOutcome::Failed(NetworkError::SocketError("session channel closed".into()))
            }
            Err(_) => return PunchOutcome::Failed(NetworkError::Timeout),
        };
        let (_, from) = incoming;

        if tuning.send_response_probes {
            for seq in 0..tuning.response_probe_count {
                let probe = Probe::new(seq, now_ms(), my_id, true);
                let _ = socket.send_to(&probe.encode(), from).await;
                tokio::time::sleep(RESPONSE_PROBE_INTERVAL).await;
            }
        }

        PunchOutcome::Success {
            endpoint: from,
            rtt_ms: now_ms().saturating_sub(received_at),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simultaneous_punch_between_two_local_sockets() {
        let engine_a = ProbeEngine::new();
        let engine_b = ProbeEngine::new();

        let port_a = pick_free_port().await;
        let port_b = pick_free_port().await;
        let addr_a = SocketAddr::new([127, 0, 0, 1].into(), port_a);
        let addr_b = SocketAddr::new([127, 0, 0, 1].into(), port_b);

        let tuning = ProbeTuning {
            probe_count: 3,
            probe_interval: Duration::from_millis(20),
            timeout: Duration::from_secs(2),
            ..ProbeTuning::default()
        };

        let a = engine_a.execute("peer-a", "peer-b", addr_b, Strategy::Simultaneous, port_a, tuning);
        let b = engine_b.execute("peer-b", "peer-a", addr_a, Strategy::Simultaneous, port_b, tuning);

        let (result_a, result_b) = tokio::join!(a, b);
        match (result_a, result_b) {
            (
                PunchOutcome::Success { endpoint: ea, .. },
                PunchOutcome::Success { endpoint: eb, .. },
            ) => {
                assert_eq!(ea, addr_b);
                assert_eq!(eb, addr_a);
            }
            other => panic!("expected both sides to succeed: {:?}", other),
        }
    }

    async fn pick_free_port() -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn responder_first_times_out_without_incoming_probe() {
        let engine = ProbeEngine::new();
        let port = pick_free_port().await;
        let target = SocketAddr::new([127, 0, 0, 1].into(), pick_free_port().await);
        let tuning = ProbeTuning {
            timeout: Duration::from_millis(100),
            ..ProbeTuning::default()
        };
        let outcome = engine
            .execute("me", "them", target, Strategy::ResponderFirst, port, tuning)
            .await;
        assert_eq!(outcome, PunchOutcome::Failed(NetworkError::Timeout));
    }

    #[tokio::test]
    async fn cancel_by_peer_interrupts_a_running_attempt_before_its_timeout() {
        let engine = ProbeEngine::new();
        let port = pick_free_port().await;
        let target = SocketAddr::new([127, 0, 0, 1].into(), pick_free_port().await);
        let tuning = ProbeTuning {
            timeout: Duration::from_secs(20),
            probe_count: 1,
            probe_interval: Duration::from_millis(10),
            ..ProbeTuning::default()
        };

        let engine_clone = engine.clone();
        let run = tokio::spawn(async move {
            engine_clone
                .execute("me", "them", target, Strategy::ResponderFirst, port, tuning)
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.cancel_by_peer("them").await;

        let outcome = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("cancellation should resolve the attempt well before its 20s timeout")
            .unwrap();
        assert_eq!(outcome, PunchOutcome::Failed(NetworkError::Cancelled));
    }

    #[tokio::test]
    async fn handle_incoming_probe_matches_by_target_endpoint() {
        let engine = ProbeEngine::new();
        let port = pick_free_port().await;
        let target = SocketAddr::new([127, 0, 0, 1].into(), pick_free_port().await);
        let tuning = ProbeTuning {
            timeout: Duration::from_secs(1),
            probe_count: 1,
            probe_interval: Duration::from_millis(10),
            ..ProbeTuning::default()
        };

        let engine_clone = engine.clone();
        let feed = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let probe = Probe::new(0, 0, "them", false);
            engine_clone.handle_incoming_probe(target, probe).await;
        });

        let outcome = engine
            .execute("me", "them", target, Strategy::Simultaneous, port, tuning)
            .await;
        feed.await.unwrap();
        match outcome {
            PunchOutcome::Success { endpoint, .. } => assert_eq!(endpoint, target),
            other => panic!("expected success, got {:?}", other),
        }
    }
}
