//! Public-node coordinator role: match hole-punch requests, invite the
//! target, and direct simultaneous execution
//!
//! Preconditions (enforced by the caller, not this module): the node
//! running this service must itself be directly reachable and have a route
//! to both peers it brokers for.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;

use crate::error::NetworkError;
use crate::nat::types::{evaluate_compatibility, Compatibility, NatType, Strategy};
use crate::Result;

/// Default cap on concurrently in-flight requests.
pub const DEFAULT_MAX_CONCURRENT: usize = 50;
/// Default expiry for a request that never reaches `completed`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default expiry for a request stuck at `inviteSent`.
pub const DEFAULT_INVITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default cleanup sweep interval.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Lifecycle state of a brokered request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    /// Just created, not yet invited.
    Pending,
    /// Invite sent to the target, awaiting its result.
    InviteSent,
    /// Execute directive sent to the initiator; punch in progress.
    Executing,
    /// Both sides reported in.
    Completed(bool),
    /// Expired by the cleanup sweep.
    Expired,
}

/// Coordinator-side record of a brokered hole-punch attempt.
#[derive(Debug, Clone)]
pub struct HolePunchRequest {
    /// Server-generated identifier.
    pub request_id: String,
    /// The peer that asked to connect.
    pub initiator_peer_id: String,
    /// The initiator's reported endpoint.
    pub initiator_endpoint: SocketAddr,
    /// The initiator's reported NAT classification.
    pub initiator_nat_type: NatType,
    /// The peer being connected to.
    pub target_peer_id: String,
    /// Creation time, milliseconds since the epoch.
    pub created_at: u64,
    /// Current lifecycle state.
    pub state: RequestState,
}

/// A directive to send to the brokered peers once a strategy is chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Sent to the target: someone wants to connect.
    Invite {
        target_peer_id: String,
        from_peer_id: String,
        from_endpoint: SocketAddr,
    },
    /// Sent to the initiator: execute the punch now. `simultaneous` is the
    /// single locked-in wire flag, never a parallel strategy enum.
    Execute {
        initiator_peer_id: String,
        target_endpoint: SocketAddr,
        simultaneous: bool,
    },
    /// The request was rejected outright (capacity, unknown target, or
    /// impossible compatibility).
    Reject { initiator_peer_id: String },
}

/// A peer's currently known endpoint/NAT type, as looked up by the
/// coordinator when brokering a request.
pub trait PeerLookup: Send + Sync {
    /// Best-known endpoint and NAT type for `peer_id`, if known.
    fn lookup(&self, peer_id: &str) -> Option<(SocketAddr, NatType)>;
}

enum Command {
    HandleRequest {
        initiator: String,
        target: String,
        initiator_endpoint: SocketAddr,
        initiator_nat_type: NatType,
        reply: oneshot::Sender<Result<Vec<Directive>>>,
    },
    HandleResult {
        from: String,
        target_peer: String,
        success: bool,
        reply: oneshot::Sender<()>,
    },
    Cleanup,
}

/// Handle to a running coordinator service.
#[derive(Clone)]
pub struct CoordinatorService {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorService {
    /// Spawn the coordinator actor, brokering against `lookup` for peer
    /// endpoint/NAT-type data.
    pub fn spawn(max_concurrent: usize, lookup: Box<dyn PeerLookup>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run(max_concurrent, lookup, rx, tx.clone()));
        Self { tx }
    }

    /// Broker a connection request from `initiator` to `target`.
    pub async fn handle_request(
        &self,
        initiator: impl Into<String>,
        target: impl Into<String>,
        initiator_endpoint: SocketAddr,
        initiator_nat_type: NatType,
    ) -> Result<Vec<Directive>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::HandleRequest {
                initiator: initiator.into(),
                target: target.into(),
                initiator_endpoint,
                initiator_nat_type,
                reply,
            })
            .await
            .map_err(|_| NetworkError::NotConnected)?;
        rx.await.map_err(|_| NetworkError::NotConnected)?
    }

    /// Record a punch outcome reported by one of the brokered peers.
    pub async fn handle_result(
        &self,
        from: impl Into<String>,
        target_peer: impl Into<String>,
        success: bool,
    ) {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::HandleResult {
                from: from.into(),
                target_peer: target_peer.into(),
                success,
                reply,
            })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

async fn run(
    max_concurrent: usize,
    lookup: Box<dyn PeerLookup>,
    mut rx: mpsc::Receiver<Command>,
    self_tx: mpsc::Sender<Command>,
) {
    let mut requests: HashMap<String, HolePunchRequest> = HashMap::new();
    let mut next_id: u64 = 0;

    tokio::spawn(async move {
        let mut ticker = interval(DEFAULT_CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            if self_tx.send(Command::Cleanup).await.is_err() {
                break;
            }
        }
    });

    loop {
        let Some(command) = rx.recv().await else {
            break;
        };
        match command {
            Command::HandleRequest {
                initiator,
                target,
                initiator_endpoint,
                initiator_nat_type,
                reply,
            } => {
                let in_flight = requests
                    .values()
                    .filter(|r| {
                        matches!(
                            r.state,
                            RequestState::Pending | RequestState::InviteSent | RequestState::Executing
                        )
                    })
                    .count();
                if in_flight >= max_concurrent {
                    let _ = reply.send(Err(NetworkError::AtCapacity));
                    continue;
                }

                let Some((target_endpoint, target_nat_type)) = lookup.lookup(&target) else {
                    let _ = reply.send(Err(NetworkError::PeerNotFound));
                    continue;
                };

                let compatibility = evaluate_compatibility(initiator_nat_type, target_nat_type, true);
                let simultaneous = match compatibility {
                    Compatibility::Impossible => {
                        let _ = reply.send(Err(NetworkError::BothSymmetric));
                        continue;
                    }
                    Compatibility::Strategy(s) => s == Strategy::Simultaneous,
                };

                next_id += 1;
                let request_id = format!("req-{}", next_id);
                requests.insert(
                    request_id.clone(),
                    HolePunchRequest {
                        request_id,
                        initiator_peer_id: initiator.clone(),
                        initiator_endpoint,
                        initiator_nat_type,
                        target_peer_id: target.clone(),
                        created_at: now_ms(),
                        state: RequestState::InviteSent,
                    },
                );

                let _ = target_endpoint;
                let _ = reply.send(Ok(vec![
                    Directive::Invite {
                        target_peer_id: target,
                        from_peer_id: initiator.clone(),
                        from_endpoint: initiator_endpoint,
                    },
                    Directive::Execute {
                        initiator_peer_id: initiator,
                        target_endpoint,
                        simultaneous,
                    },
                ]));
            }
            Command::HandleResult {
                from,
                target_peer,
                success,
                reply,
            } => {
                for request in requests.values_mut() {
                    let matches = (request.initiator_peer_id == from && request.target_peer_id == target_peer)
                        || (request.initiator_peer_id == target_peer && request.target_peer_id == from);
                    if matches {
                        request.state = RequestState::Completed(success);
                    }
                }
                let _ = reply.send(());
            }
            Command::Cleanup => {
                let now = now_ms();
                for request in requests.values_mut() {
                    let age_ms = now.saturating_sub(request.created_at);
                    match request.state {
                        RequestState::InviteSent
                            if age_ms > DEFAULT_INVITE_TIMEOUT.as_millis() as u64 =>
                        {
                            request.state = RequestState::Expired;
                        }
                        RequestState::Pending | RequestState::Executing
                            if age_ms > DEFAULT_REQUEST_TIMEOUT.as_millis() as u64 =>
                        {
                            request.state = RequestState::Expired;
                        }
                        RequestState::Completed(_)
                            if age_ms > DEFAULT_CLEANUP_INTERVAL.as_millis() as u64 =>
                        {
                            request.state = RequestState::Expired;
                        }
                        _ => {}
                    }
                }
                requests.retain(|_, r| r.state != RequestState::Expired);
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
