//! Relay session lifecycle, capacity control, and candidate scoring

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};

use crate::error::NetworkError;
use crate::nat::types::NatType;
use crate::Result;

/// Relay data-frame message types, per the wire format in spec §6.
pub mod frame {
    /// Register this connection with the relay, presenting a token.
    pub const REGISTER: u8 = 0x01;
    /// A payload frame carrying relayed application data.
    pub const DATA: u8 = 0x02;
    /// Keepalive with no payload.
    pub const KEEPALIVE: u8 = 0x03;
}

/// Lifecycle state of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Allocated but not yet carrying traffic.
    Pending,
    /// Actively relaying traffic.
    Active,
    /// Draining; no new traffic should be admitted.
    Closing,
    /// Fully torn down.
    Closed,
}

/// A relay session between two peers via a third (`relay_peer_id`).
#[derive(Debug, Clone)]
pub struct RelaySession {
    /// Unique session identifier.
    pub session_id: String,
    /// This node's PeerId.
    pub local_peer_id: String,
    /// The remote peer being relayed to.
    pub remote_peer_id: String,
    /// The relay node carrying the traffic.
    pub relay_peer_id: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Total bytes sent through this session.
    pub bytes_sent: u64,
    /// Total bytes received through this session.
    pub bytes_received: u64,
    /// Creation time, milliseconds since the epoch.
    pub created_at: u64,
    /// Last traffic time, milliseconds since the epoch.
    pub last_activity: u64,
}

/// Inputs to the relay candidate scoring function.
#[derive(Debug, Clone, Copy)]
pub struct CandidateMetrics {
    /// Measured or estimated round-trip time to the candidate.
    pub rtt: Duration,
    /// Whether this relay is directly reachable without its own hole punch.
    pub is_direct: bool,
    /// The candidate's own NAT classification.
    pub nat_type: NatType,
    /// Remaining session capacity on the candidate.
    pub available_capacity: u32,
}

/// Score a relay candidate. Higher is better.
///
/// Monotonic in each dimension independently: lower RTT, direct reachability,
/// better NAT reachability rank, and more available capacity each strictly
/// increase the score, holding the others fixed.
pub fn score_candidate(metrics: CandidateMetrics) -> f64 {
    let base = 1000.0 - metrics.rtt.as_secs_f64() * 1000.0;
    let direct_bonus = if metrics.is_direct { 500.0 } else { 0.0 };
    let nat_bonus = metrics.nat_type.reachability_rank() as f64 * 50.0;
    let capacity_bonus = metrics.available_capacity as f64 * 2.0;
    base + direct_bonus + nat_bonus + capacity_bonus
}

enum Command {
    Create {
        session_id: String,
        local: String,
        remote: String,
        relay: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Activate(String),
    BeginClosing(String),
    Close(String),
    RecordOutgoing(String, u64),
    HandleIncoming(String, u64),
    ByPeer(String, oneshot::Sender<Vec<RelaySession>>),
    ByRelay(String, oneshot::Sender<Vec<RelaySession>>),
    AllSessions(oneshot::Sender<Vec<RelaySession>>),
    EvictIdle(Duration),
}

/// Handle to a running relay session manager.
#[derive(Clone)]
pub struct RelaySessionManager {
    tx: mpsc::Sender<Command>,
}

impl RelaySessionManager {
    /// Spawn a manager capped at `max_sessions` concurrently active/pending
    /// sessions.
    pub fn spawn(max_sessions: usize) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run(max_sessions, rx));
        Self { tx }
    }

    /// Allocate a new `pending` session. Fails with [`NetworkError::AtCapacity`]
    /// if already at `max_sessions`.
    pub async fn create_session(
        &self,
        session_id: impl Into<String>,
        local: impl Into<String>,
        remote: impl Into<String>,
        relay: impl Into<String>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Create {
                session_id: session_id.into(),
                local: local.into(),
                remote: remote.into(),
                relay: relay.into(),
                reply,
            })
            .await
            .map_err(|_| NetworkError::NotConnected)?;
        rx.await.map_err(|_| NetworkError::NotConnected)?
    }

    /// Transition a session to `active`.
    pub async fn activate(&self, session_id: impl Into<String>) {
        let _ = self.tx.send(Command::Activate(session_id.into())).await;
    }

    /// Transition a session to `closing`.
    pub async fn begin_closing(&self, session_id: impl Into<String>) {
        let _ = self.tx.send(Command::BeginClosing(session_id.into())).await;
    }

    /// Transition a session to `closed`.
    pub async fn close(&self, session_id: impl Into<String>) {
        let _ = self.tx.send(Command::Close(session_id.into())).await;
    }

    /// Record outgoing bytes. A no-op unless the session is `active`.
    pub async fn record_outgoing(&self, session_id: impl Into<String>, bytes: u64) {
        let _ = self
            .tx
            .send(Command::RecordOutgoing(session_id.into(), bytes))
            .await;
    }

    /// Record incoming bytes. A no-op unless the session is `active`.
    pub async fn handle_incoming(&self, session_id: impl Into<String>, bytes: u64) {
        let _ = self
            .tx
            .send(Command::HandleIncoming(session_id.into(), bytes))
            .await;
    }

    /// All sessions involving `peer_id`, either as local or remote.
    pub async fn sessions_by_peer(&self, peer_id: impl Into<String>) -> Vec<RelaySession> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::ByPeer(peer_id.into(), reply))
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// All sessions carried by `relay_peer_id`.
    pub async fn sessions_by_relay(&self, relay_peer_id: impl Into<String>) -> Vec<RelaySession> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::ByRelay(relay_peer_id.into(), reply))
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Every known session regardless of state.
    pub async fn all_sessions(&self) -> Vec<RelaySession> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::AllSessions(reply)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Close any `active` session whose `last_activity` is older than
    /// `idle_timeout`.
    pub async fn evict_idle(&self, idle_timeout: Duration) {
        let _ = self.tx.send(Command::EvictIdle(idle_timeout)).await;
    }
}

async fn run(max_sessions: usize, mut rx: mpsc::Receiver<Command>) {
    let mut sessions: HashMap<String, RelaySession> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Create {
                session_id,
                local,
                remote,
                relay,
                reply,
            } => {
                let active_count = sessions
                    .values()
                    .filter(|s| !matches!(s.state, SessionState::Closed))
                    .count();
                if active_count >= max_sessions {
                    let _ = reply.send(Err(NetworkError::AtCapacity));
                    continue;
                }
                let now = now_ms();
                sessions.insert(
                    session_id.clone(),
                    RelaySession {
                        session_id,
                        local_peer_id: local,
                        remote_peer_id: remote,
                        relay_peer_id: relay,
                        state: SessionState::Pending,
                        bytes_sent: 0,
                        bytes_received: 0,
                        created_at: now,
                        last_activity: now,
                    },
                );
                let _ = reply.send(Ok(()));
            }
            Command::Activate(id) => {
                if let Some(s) = sessions.get_mut(&id) {
                    s.state = SessionState::Active;
                    s.last_activity = now_ms();
                }
            }
            Command::BeginClosing(id) => {
                if let Some(s) = sessions.get_mut(&id) {
                    s.state = SessionState::Closing;
                }
            }
            Command::Close(id) => {
                if let Some(s) = sessions.get_mut(&id) {
                    s.state = SessionState::Closed;
                }
            }
            Command::RecordOutgoing(id, bytes) => {
                if let Some(s) = sessions.get_mut(&id) {
                    if s.state == SessionState::Active {
                        s.bytes_sent += bytes;
                        s.last_activity = now_ms();
                    }
                }
            }
            Command::HandleIncoming(id, bytes) => {
                if let Some(s) = sessions.get_mut(&id) {
                    if s.state == SessionState::Active {
                        s.bytes_received += bytes;
                        s.last_activity = now_ms();
                    }
                }
            }
            Command::ByPeer(peer_id, reply) => {
                let matches = sessions
                    .values()
                    .filter(|s| s.local_peer_id == peer_id || s.remote_peer_id == peer_id)
                    .cloned()
                    .collect();
                let _ = reply.send(matches);
            }
            Command::ByRelay(relay_peer_id, reply) => {
                let matches = sessions
                    .values()
                    .filter(|s| s.relay_peer_id == relay_peer_id)
                    .cloned()
                    .collect();
                let _ = reply.send(matches);
            }
            Command::AllSessions(reply) => {
                let _ = reply.send(sessions.values().cloned().collect());
            }
            Command::EvictIdle(idle_timeout) => {
                let now = now_ms();
                let cutoff_ms = idle_timeout.as_millis() as u64;
                for s in sessions.values_mut() {
                    if s.state == SessionState::Active
                        && now.saturating_sub(s.last_activity) > cutoff_ms
                    {
                        s.state = SessionState::Closed;
                    }
                }
            }
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

    #[test]
    fn lower_rtt_scores_strictly_higher() {
        let base = CandidateMetrics {
            rtt: Duration::from_millis(200),
            is_direct: false,
            nat_type: NatType::FullCone,
            available_capacity: 10,
        };
        let faster = CandidateMetrics {
            rtt: Duration::from_millis(50),
            ..base
        };
        assert!(score_candidate(faster) > score_candidate(base));
    }

    #[test]
    fn direct_reachability_scores_strictly_higher() {
        let base = CandidateMetrics {
            rtt: Duration::from_millis(100),
            is_direct: false,
            nat_type: NatType::RestrictedCone,
            available_capacity: 5,
        };
        let direct = CandidateMetrics {
            is_direct: true,
            ..base
        };
        assert!(score_candidate(direct) > score_candidate(base));
    }

    #[test]
    fn nat_reachability_order_is_respected() {
        let with = |nat_type: NatType| CandidateMetrics {
            rtt: Duration::from_millis(100),
            is_direct: false,
            nat_type,
            available_capacity: 5,
        };
        assert!(score_candidate(with(NatType::Public)) > score_candidate(with(NatType::FullCone)));
        assert!(
            score_candidate(with(NatType::FullCone)) > score_candidate(with(NatType::RestrictedCone))
        );
        assert!(
            score_candidate(with(NatType::RestrictedCone))
                > score_candidate(with(NatType::PortRestrictedCone))
        );
        assert!(
            score_candidate(with(NatType::PortRestrictedCone))
                > score_candidate(with(NatType::Symmetric))
        );
    }

    #[test]
    fn more_capacity_scores_strictly_higher() {
        let base = CandidateMetrics {
            rtt: Duration::from_millis(100),
            is_direct: false,
            nat_type: NatType::FullCone,
            available_capacity: 1,
        };
        let roomier = CandidateMetrics {
            available_capacity: 20,
            ..base
        };
        assert!(score_candidate(roomier) > score_candidate(base));
    }

    #[tokio::test]
    async fn create_session_rejects_at_capacity() {
        let manager = RelaySessionManager::spawn(1);
        manager
            .create_session("s1", "local", "remote", "relay")
            .await
            .unwrap();
        let result = manager.create_session("s2", "local", "r2", "relay").await;
        assert!(matches!(result, Err(NetworkError::AtCapacity)));
    }

    #[tokio::test]
    async fn counters_only_update_while_active() {
        let manager = RelaySessionManager::spawn(10);
        manager
            .create_session("s1", "local", "remote", "relay")
            .await
            .unwrap();
        manager.record_outgoing("s1", 100).await;
        let sessions = manager.all_sessions().await;
        assert_eq!(sessions[0].bytes_sent, 0);

        manager.activate("s1").await;
        manager.record_outgoing("s1", 100).await;
        manager.handle_incoming("s1", 50).await;
        let sessions = manager.all_sessions().await;
        assert_eq!(sessions[0].bytes_sent, 100);
        assert_eq!(sessions[0].bytes_received, 50);
    }

    #[tokio::test]
    async fn idle_eviction_closes_stale_active_sessions() {
        let manager = RelaySessionManager::spawn(10);
        manager
            .create_session("s1", "local", "remote", "relay")
            .await
            .unwrap();
        manager.activate("s1").await;
        manager.evict_idle(Duration::from_millis(0)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.evict_idle(Duration::from_millis(0)).await;
        let sessions = manager.all_sessions().await;
        assert_eq!(sessions[0].state, SessionState::Closed);
    }

    #[tokio::test]
    async fn sessions_queryable_by_peer_and_relay() {
        let manager = RelaySessionManager::spawn(10);
        manager
            .create_session("s1", "alice", "bob", "relay1")
            .await
            .unwrap();
        manager
            .create_session("s2", "carol", "bob", "relay2")
            .await
            .unwrap();

        let bob_sessions = manager.sessions_by_peer("bob").await;
        assert_eq!(bob_sessions.len(), 2);

        let relay1_sessions = manager.sessions_by_relay("relay1").await;
        assert_eq!(relay1_sessions.len(), 1);
        assert_eq!(relay1_sessions[0].session_id, "s1");
    }
}
