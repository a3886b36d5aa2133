//! Decide whether a pair can be hole-punched, choose a strategy, and drive
//! the exchange through to a [`HolePunchResult`]
//!
//! Runs as an actor: `establish` requests and incoming invites are both
//! handled from the same task so pending waiters never race each other.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::NetworkError;
use crate::nat::types::{evaluate_compatibility, Compatibility, NatType, Strategy};
use crate::probe_engine::{ProbeEngine, ProbeTuning, PunchOutcome};
use crate::Result;

/// Outcome of an `establishDirectConnection` attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum HolePunchResult {
    /// Direct connectivity was established.
    Success {
        /// The endpoint traffic is flowing through.
        endpoint: SocketAddr,
        /// Approximate round-trip time in milliseconds.
        rtt_ms: u64,
    },
    /// The attempt failed.
    Failed(NetworkError),
}

/// A local punch attempt's state, mirroring spec §4.8's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaiterState {
    RequestSent,
    AwaitingExecute,
    Executing,
}

struct Waiter {
    state: WaiterState,
    reply: oneshot::Sender<HolePunchResult>,
}

enum Command {
    /// Start establishing a direct connection to `target`.
    Establish {
        target_peer_id: String,
        target_endpoint: SocketAddr,
        my_endpoint: Option<SocketAddr>,
        my_nat_type: NatType,
        my_peer_id: String,
        local_port: u16,
        reply: oneshot::Sender<HolePunchResult>,
    },
    /// The spawned `execute()` attempt for `target_peer_id` resolved.
    ExecuteComplete {
        target_peer_id: String,
        outcome: PunchOutcome,
    },
    /// The coordinator directed this node to execute a punch.
    Execute {
        target_peer_id: String,
        target_endpoint: SocketAddr,
        simultaneous: bool,
        my_peer_id: String,
        local_port: u16,
    },
    /// Execute a punch immediately, with no prior `Establish` waiter
    /// registered, resolving directly rather than through a matching reply.
    ExecuteAwait {
        target_peer_id: String,
        target_endpoint: SocketAddr,
        simultaneous: bool,
        my_peer_id: String,
        local_port: u16,
        reply: oneshot::Sender<HolePunchResult>,
    },
    /// An unsolicited invite from another peer via the coordinator.
    Invite {
        from_peer_id: String,
        from_endpoint: SocketAddr,
        from_nat_type: NatType,
        my_nat_type: NatType,
        my_peer_id: String,
        local_port: u16,
        reply: oneshot::Sender<HolePunchResult>,
    },
    /// Cancel a pending waiter for `target_peer_id`.
    Cancel { target_peer_id: String },
    /// Internal: the `2 × probe timeout` deadline elapsed without an
    /// execute directive arriving.
    Expire { target_peer_id: String },
}

/// Tuning knobs threaded through to [`ProbeEngine::execute`].
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorTuning {
    /// Probe burst parameters.
    pub probe: ProbeTuning,
}

impl Default for OrchestratorTuning {
    fn default() -> Self {
        Self {
            probe: ProbeTuning::default(),
        }
    }
}

/// Handle to a running hole-punch orchestrator.
#[derive(Clone)]
pub struct HolePunchOrchestrator {
    tx: mpsc::Sender<Command>,
}

impl HolePunchOrchestrator {
    /// Spawn the orchestrator actor.
    pub fn spawn(tuning: OrchestratorTuning) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let engine = ProbeEngine::new();
        tokio::spawn(run(engine, tuning, rx, tx.clone()));
        Self { tx }
    }

    /// Attempt to establish a direct connection to `target_peer_id` at
    /// `target_endpoint`. `target_nat_type` is the best NAT classification
    /// known for the target (e.g. from a prior `PeerEndpoint` signaling
    /// message or the local endpoint store); pass `NatType::Unknown` if
    /// nothing better is known, which defers the compatibility decision to
    /// the coordinator. Resolves to `Failed(Timeout)` if no coordinator
    /// reply arrives within `2 × probe timeout`.
    pub async fn establish(
        &self,
        my_peer_id: &str,
        my_nat_type: NatType,
        my_endpoint: Option<SocketAddr>,
        target_peer_id: &str,
        target_endpoint: SocketAddr,
        target_nat_type: NatType,
        local_port: u16,
    ) -> HolePunchResult {
        // IPv6 targets are assumed reachable without punching.
        if target_endpoint.is_ipv6() {
            return HolePunchResult::Success {
                endpoint: target_endpoint,
                rtt_ms: 0,
            };
        }

        let compatibility =
            evaluate_compatibility(my_nat_type, target_nat_type, my_endpoint.is_some());
        if let Compatibility::Impossible = compatibility {
            return HolePunchResult::Failed(NetworkError::BothSymmetric);
        }
        if my_nat_type.is_directly_reachable() && my_endpoint.is_some() {
            return HolePunchResult::Success {
                endpoint: target_endpoint,
                rtt_ms: 0,
            };
        }

        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Establish {
                target_peer_id: target_peer_id.to_string(),
                target_endpoint,
                my_endpoint,
                my_nat_type,
                my_peer_id: my_peer_id.to_string(),
                local_port,
                reply,
            })
            .await
            .is_err()
        {
            return HolePunchResult::Failed(NetworkError::NotConnected);
        }
        rx.await.unwrap_or(HolePunchResult::Failed(NetworkError::Cancelled))
    }

    /// Coordinator directive: execute a punch now.
    pub async fn execute(
        &self,
        my_peer_id: &str,
        target_peer_id: &str,
        target_endpoint: SocketAddr,
        simultaneous: bool,
        local_port: u16,
    ) {
        let _ = self
            .tx
            .send(Command::Execute {
                target_peer_id: target_peer_id.to_string(),
                target_endpoint,
                simultaneous,
                my_peer_id: my_peer_id.to_string(),
                local_port,
            })
            .await;
    }

    /// Execute a punch immediately and wait for its outcome, with no prior
    /// `establish()` waiter registered first. Used for the initiator side of
    /// a coordinator-driven connection: once `RequestConnection` has been
    /// sent, the coordinator's `HolePunchStrategy`/`HolePunchNow` pair carry
    /// everything needed to execute directly.
    pub async fn execute_and_await(
        &self,
        my_peer_id: &str,
        target_peer_id: &str,
        target_endpoint: SocketAddr,
        simultaneous: bool,
        local_port: u16,
    ) -> HolePunchResult {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::ExecuteAwait {
                target_peer_id: target_peer_id.to_string(),
                target_endpoint,
                simultaneous,
                my_peer_id: my_peer_id.to_string(),
                local_port,
                reply,
            })
            .await
            .is_err()
        {
            return HolePunchResult::Failed(NetworkError::NotConnected);
        }
        rx.await.unwrap_or(HolePunchResult::Failed(NetworkError::Cancelled))
    }

    /// Incoming invite from another peer (relayed through the coordinator,
    /// not the coordinator's own NAT type — each side derives its own).
    /// Resolves once the punch attempt against `from_peer_id` completes.
    pub async fn handle_invite(
        &self,
        my_peer_id: &str,
        my_nat_type: NatType,
        from_peer_id: &str,
        from_endpoint: SocketAddr,
        from_nat_type: NatType,
        local_port: u16,
    ) -> HolePunchResult {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Invite {
                from_peer_id: from_peer_id.to_string(),
                from_endpoint,
                from_nat_type,
                my_nat_type,
                my_peer_id: my_peer_id.to_string(),
                local_port,
                reply,
            })
            .await
            .is_err()
        {
            return HolePunchResult::Failed(NetworkError::NotConnected);
        }
        rx.await.unwrap_or(HolePunchResult::Failed(NetworkError::Cancelled))
    }

    /// Cancel a pending waiter for `target_peer_id`, if any. Resolves it
    /// with `Failed(Cancelled)`.
    pub async fn cancel(&self, target_peer_id: &str) {
        let _ = self
            .tx
            .send(Command::Cancel {
                target_peer_id: target_peer_id.to_string(),
            })
            .await;
    }
}

async fn run(
    engine: ProbeEngine,
    tuning: OrchestratorTuning,
    mut rx: mpsc::Receiver<Command>,
    self_tx: mpsc::Sender<Command>,
) {
    let mut waiters: HashMap<String, Waiter> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Establish {
                target_peer_id,
                reply,
                ..
            } => {
                // The actual request/execute round trip happens over a
                // SignalingClient, which feeds Execute/Invite back into this
                // actor as the server's directives arrive. This arm only
                // registers the waiter and arms its deadline.
                waiters.insert(
                    target_peer_id.clone(),
                    Waiter {
                        state: WaiterState::RequestSent,
                        reply,
                    },
                );
                let deadline = tuning.probe.timeout * 2;
                let expiring = target_peer_id.clone();
                let self_tx = self_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(deadline).await;
                    let _ = self_tx
                        .send(Command::Expire {
                            target_peer_id: expiring,
                        })
                        .await;
                });
            }
            Command::Expire { target_peer_id } => {
                if let Some(waiter) = waiters.remove(&target_peer_id) {
                    let _ = waiter.reply.send(HolePunchResult::Failed(NetworkError::Timeout));
                }
            }
            Command::Execute {
                target_peer_id,
                target_endpoint,
                simultaneous,
                my_peer_id,
                local_port,
            } => {
                if let Some(waiter) = waiters.get_mut(&target_peer_id) {
                    waiter.state = WaiterState::Executing;
                }
                let strategy = if simultaneous {
                    Strategy::Simultaneous
                } else {
                    Strategy::InitiatorFirst
                };
                // Run the attempt on its own task so this actor keeps
                // servicing other commands (in particular `Cancel`) while
                // the punch is in flight rather than blocking on it.
                let engine = engine.clone();
                let probe_tuning = tuning.probe;
                let self_tx = self_tx.clone();
                let completing_id = target_peer_id.clone();
                tokio::spawn(async move {
                    let outcome = engine
                        .execute(
                            &my_peer_id,
                            &target_peer_id,
                            target_endpoint,
                            strategy,
                            local_port,
                            probe_tuning,
                        )
                        .await;
                    let _ = self_tx
                        .send(Command::ExecuteComplete {
                            target_peer_id: completing_id,
                            outcome,
                        })
                        .await;
                });
            }
            Command::ExecuteAwait {
                target_peer_id,
                target_endpoint,
                simultaneous,
                my_peer_id,
                local_port,
                reply,
            } => {
                waiters.insert(
                    target_peer_id.clone(),
                    Waiter {
                        state: WaiterState::Executing,
                        reply,
                    },
                );
                let strategy = if simultaneous {
                    Strategy::Simultaneous
                } else {
                    Strategy::InitiatorFirst
                };
                let engine = engine.clone();
                let probe_tuning = tuning.probe;
                let self_tx = self_tx.clone();
                let completing_id = target_peer_id.clone();
                tokio::spawn(async move {
                    let outcome = engine
                        .execute(
                            &my_peer_id,
                            &target_peer_id,
                            target_endpoint,
                            strategy,
                            local_port,
                            probe_tuning,
                        )
                        .await;
                    let _ = self_tx
                        .send(Command::ExecuteComplete {
                            target_peer_id: completing_id,
                            outcome,
                        })
                        .await;
                });
            }
            Command::ExecuteComplete { target_peer_id, outcome } => {
                if let Some(waiter) = waiters.remove(&target_peer_id) {
                    let _ = waiter.reply.send(to_result(outcome));
                }
            }
            Command::Invite {
                from_peer_id,
                from_endpoint,
                from_nat_type,
                my_nat_type,
                my_peer_id,
                local_port,
                reply,
            } => {
                // Flip initiator/responder: the inviter was the initiator.
                let compatibility = evaluate_compatibility(from_nat_type, my_nat_type, true);
                let strategy = match compatibility {
                    Compatibility::Impossible => {
                        let _ = reply.send(HolePunchResult::Failed(NetworkError::BothSymmetric));
                        continue;
                    }
                    Compatibility::Strategy(s) => flip(s),
                };
                waiters.insert(
                    from_peer_id.clone(),
                    Waiter {
                        state: WaiterState::Executing,
                        reply,
                    },
                );
                let engine = engine.clone();
                let probe_tuning = tuning.probe;
                let self_tx = self_tx.clone();
                let completing_id = from_peer_id.clone();
                tokio::spawn(async move {
                    let outcome = engine
                        .execute(
                            &my_peer_id,
                            &from_peer_id,
                            from_endpoint,
                            strategy,
                            local_port,
                            probe_tuning,
                        )
                        .await;
                    let _ = self_tx
                        .send(Command::ExecuteComplete {
                            target_peer_id: completing_id,
                            outcome,
                        })
                        .await;
                });
            }
            Command::Cancel { target_peer_id } => {
                if let Some(waiter) = waiters.remove(&target_peer_id) {
                    let _ = waiter.reply.send(HolePunchResult::Failed(NetworkError::Cancelled));
                }
                engine.cancel_by_peer(&target_peer_id).await;
            }
        }
    }
}

/// From the invited side's perspective, `initiatorFirst`/`responderFirst`
/// swap: the side that was `responderFirst` from the initiator's view must
/// run as the initiator (send first) on its own leg, and vice versa.
fn flip(strategy: Strategy) -> Strategy {
    match strategy {
        Strategy::Simultaneous => Strategy::Simultaneous,
        Strategy::InitiatorFirst => Strategy::ResponderFirst,
        Strategy::ResponderFirst => Strategy::InitiatorFirst,
    }
}

fn to_result(outcome: PunchOutcome) -> HolePunchResult {
    match outcome {
        PunchOutcome::Success { endpoint, rtt_ms } => HolePunchResult::Success { endpoint, rtt_ms },
        PunchOutcome::Failed(e) => HolePunchResult::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ipv6_target_succeeds_without_punching() {
        let orchestrator = HolePunchOrchestrator::spawn(OrchestratorTuning::default());
        let target: SocketAddr = "[::1]:4000".parse().unwrap();
        let result = orchestrator
            .establish("me", NatType::Symmetric, None, "them", target, NatType::Symmetric, 0)
            .await;
        assert_eq!(
            result,
            HolePunchResult::Success {
                endpoint: target,
                rtt_ms: 0
            }
        );
    }

    #[tokio::test]
    async fn both_symmetric_fails_fast() {
        let orchestrator = HolePunchOrchestrator::spawn(OrchestratorTuning::default());
        let target: SocketAddr = "198.51.100.1:4000".parse().unwrap();
        let result = orchestrator
            .establish("me", NatType::Symmetric, None, "them", target, NatType::Symmetric, 0)
            .await;
        assert!(matches!(
            result,
            HolePunchResult::Failed(NetworkError::BothSymmetric)
        ));
    }

    #[tokio::test]
    async fn cancel_resolves_pending_waiter() {
        let orchestrator = HolePunchOrchestrator::spawn(OrchestratorTuning::default());
        let target: SocketAddr = "198.51.100.1:4000".parse().unwrap();
        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .establish(
                        "me",
                        NatType::RestrictedCone,
                        None,
                        "them",
                        target,
                        NatType::RestrictedCone,
                        0,
                    )
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        orchestrator.cancel("them").await;
        let result = handle.await.unwrap();
        assert_eq!(result, HolePunchResult::Failed(NetworkError::Cancelled));
    }

    #[test]
    fn flip_swaps_initiator_and_responder_first() {
        assert_eq!(flip(Strategy::InitiatorFirst), Strategy::ResponderFirst);
        assert_eq!(flip(Strategy::ResponderFirst), Strategy::InitiatorFirst);
        assert_eq!(flip(Strategy::Simultaneous), Strategy::Simultaneous);
    }
}
