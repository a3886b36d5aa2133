//! Wires the transport, codecs, and stateful components together behind a
//! single send/receive surface
//!
//! Owns identity and the [`UdpTransport`]; installs one receive callback
//! that demuxes probes from envelopes and drives dedup, signature
//! verification, endpoint tracking, and request/response continuations.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use mesh_crypto::{IdentityKeyPair, PeerId};

use crate::endpoint_store::PeerEndpointStore;
use crate::envelope::{DedupOutcome, Envelope, EnvelopeCodec};
use crate::error::NetworkError;
use crate::events::{names, Event, EventSink};
use crate::orchestrator::{HolePunchOrchestrator, OrchestratorTuning};
use crate::probe::Probe;
use crate::probe_engine::ProbeEngine;
use crate::relay::RelaySessionManager;
use crate::transport::UdpTransport;
use crate::Result;

/// Cap on concurrently active/pending relay sessions this node will track.
const DEFAULT_MAX_RELAY_SESSIONS: usize = 50;

/// Default number of recent peers carried in a ping/pong and in responses
/// to a pong (spec §4.12: truncated to 10 entries).
const RECENT_PEERS_LIMIT: usize = 10;

/// Messages the facade recognizes on its own, independent of whatever
/// application payload a caller layers on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum FacadeMessage {
    /// Liveness probe carrying the sender's recently-seen peers.
    Ping {
        #[serde(default)]
        recent_peers: Vec<String>,
    },
    /// Reply to [`FacadeMessage::Ping`].
    Pong {
        #[serde(default)]
        recent_peers: Vec<String>,
    },
    /// Reply correlated to a `sendAndReceive` request by `request_id`.
    Response {
        request_id: String,
        payload: Value,
    },
}

/// Handler for application envelopes the facade doesn't recognize itself.
pub type MessageHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

struct Shared {
    identity: IdentityKeyPair,
    transport: UdpTransport,
    probe_engine: ProbeEngine,
    envelope_codec: Mutex<EnvelopeCodec>,
    endpoint_store: PeerEndpointStore,
    orchestrator: HolePunchOrchestrator,
    relay: RelaySessionManager,
    known_keys: StdMutex<HashMap<String, [u8; 32]>>,
    recent_peers: StdMutex<Vec<String>>,
    pending: StdMutex<HashMap<String, oneshot::Sender<Envelope>>>,
    handler: StdMutex<Option<MessageHandler>>,
    events: Arc<dyn EventSink>,
}

/// Wires transport, envelope handling, NAT state, and probe dispatch behind
/// one facade.
#[derive(Clone)]
pub struct MeshNodeFacade {
    shared: Arc<Shared>,
}

impl MeshNodeFacade {
    /// Bind a UDP transport on `port`, install the demux handler, and
    /// return a ready-to-use facade.
    pub async fn new(
        identity: IdentityKeyPair,
        port: u16,
        endpoint_store: PeerEndpointStore,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let mut transport = UdpTransport::bind(port).await?;

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let weak = weak.clone();
            transport.on_receive(Arc::new(move |bytes, from| {
                let weak = weak.clone();
                tokio::spawn(async move {
                    if let Some(shared) = weak.upgrade() {
                        handle_datagram(shared, bytes, from).await;
                    }
                });
            }));
            Shared {
                identity,
                transport,
                probe_engine: ProbeEngine::new(),
                envelope_codec: Mutex::new(EnvelopeCodec::new()),
                endpoint_store,
                orchestrator: HolePunchOrchestrator::spawn(OrchestratorTuning::default()),
                relay: RelaySessionManager::spawn(DEFAULT_MAX_RELAY_SESSIONS),
                known_keys: StdMutex::new(HashMap::new()),
                recent_peers: StdMutex::new(Vec::new()),
                pending: StdMutex::new(HashMap::new()),
                handler: StdMutex::new(None),
                events,
            }
        });

        Ok(Self { shared })
    }

    /// This node's PeerId.
    pub fn peer_id(&self) -> PeerId {
        *self.shared.identity.peer_id()
    }

    /// The locally bound port.
    pub fn bound_port(&self) -> u16 {
        self.shared.transport.bound_port()
    }

    /// The hole-punch orchestrator driving this node's end of any
    /// coordinator-brokered connection attempt.
    pub fn orchestrator(&self) -> &HolePunchOrchestrator {
        &self.shared.orchestrator
    }

    /// The relay session tracker for connections this node carries or rides
    /// through a relay once direct hole-punching fails.
    pub fn relay_sessions(&self) -> &RelaySessionManager {
        &self.shared.relay
    }

    /// This node's raw Ed25519 public key, for `RequestConnection`/`PeerEndpoint`
    /// wire messages that carry it directly rather than via `PeerId`.
    pub fn public_key(&self) -> [u8; 32] {
        self.shared.identity.public_key()
    }

    /// Record a peer's public signing key, learned out-of-band (e.g. via
    /// signaling). Required before envelopes from that peer can be
    /// cryptographically verified.
    pub fn learn_public_key(&self, peer_id: impl Into<String>, public_key: [u8; 32]) {
        self.shared
            .known_keys
            .lock()
            .unwrap()
            .insert(peer_id.into(), public_key);
    }

    /// Install the handler invoked for application envelopes this facade
    /// doesn't recognize itself (anything other than ping/pong/response).
    pub fn on_message(&self, handler: MessageHandler) {
        *self.shared.handler.lock().unwrap() = Some(handler);
    }

    /// Sign and send an application payload to `to` at `endpoint`.
    pub async fn send(&self, payload: Value, to: Option<&PeerId>, endpoint: SocketAddr) -> Result<()> {
        let envelope = EnvelopeCodec::sign(&self.shared.identity, payload, to, now_ms());
        let bytes = EnvelopeCodec::encode(&envelope)?;
        self.shared.transport.send(&bytes, endpoint).await?;
        Ok(())
    }

    /// Send `payload` and await a correlated reply.
    ///
    /// A `requestId` field is read from `payload` if present, otherwise one
    /// is generated and injected. Resolves on a matching `pong` (for ping
    /// payloads) or `response{requestId}`, or `Timeout` if none arrives in
    /// time.
    pub async fn send_and_receive(
        &self,
        mut payload: Value,
        to: Option<&PeerId>,
        endpoint: SocketAddr,
        timeout: Duration,
    ) -> Result<Envelope> {
        let request_id = payload
            .get("requestId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("requestId".to_string(), Value::String(request_id.clone()));
        }

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(request_id.clone(), tx);

        if let Err(e) = self.send(payload, to, endpoint).await {
            self.shared.pending.lock().unwrap().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(NetworkError::Cancelled),
            Err(_) => {
                self.shared.pending.lock().unwrap().remove(&request_id);
                Err(NetworkError::Timeout)
            }
        }
    }
}

async fn handle_datagram(shared: Arc<Shared>, bytes: Vec<u8>, from: SocketAddr) {
    if Probe::is_hole_punch_probe(&bytes) {
        if let Some(probe) = Probe::decode(&bytes) {
            shared.probe_engine.handle_incoming_probe(from, probe).await;
        }
        return;
    }

    let envelope = match EnvelopeCodec::decode(&bytes) {
        Ok(e) => e,
        Err(_) => return,
    };

    let outcome = shared.envelope_codec.lock().await.dedupe(&envelope);
    if outcome == DedupOutcome::Duplicate {
        return;
    }

    let is_ping = matches!(
        serde_json::from_value::<FacadeMessage>(envelope.payload.clone()),
        Ok(FacadeMessage::Ping { .. })
    );

    let known_key = shared
        .known_keys
        .lock()
        .unwrap()
        .get(&envelope.from_peer_id)
        .copied();

    match known_key {
        Some(key) => {
            if EnvelopeCodec::verify(&envelope, &key).is_err() {
                return;
            }
        }
        None if !is_ping => return,
        None => {}
    }

    shared
        .events
        .emit(Event::new(names::PEER_SEEN).with("peer", &envelope.from_peer_id));

    // Envelopes don't carry the *remote* peer's machineId, so received
    // traffic is tracked against a single synthetic "default" machine per
    // peer; PersistedEndpointFile::machines still has room for per-device
    // history once that's threaded through signaling.
    shared
        .endpoint_store
        .record_received(&envelope.from_peer_id, "default", &from.to_string())
        .await;

    {
        let mut recent = shared.recent_peers.lock().unwrap();
        recent.retain(|p| p != &envelope.from_peer_id);
        recent.insert(0, envelope.from_peer_id.clone());
        recent.truncate(RECENT_PEERS_LIMIT);
    }

    match serde_json::from_value::<FacadeMessage>(envelope.payload.clone()) {
        Ok(FacadeMessage::Ping { .. }) => {
            let reply_peers = shared.recent_peers.lock().unwrap().clone();
            let pong = serde_json::json!(FacadeMessage::Pong {
                recent_peers: reply_peers,
            });
            let reply = EnvelopeCodec::sign(&shared.identity, pong, None, now_ms());
            if let Ok(bytes) = EnvelopeCodec::encode(&reply) {
                let _ = shared.transport.send(&bytes, from).await;
            }
        }
        Ok(FacadeMessage::Pong { .. }) | Ok(FacadeMessage::Response { .. }) => {
            let request_id = envelope
                .payload
                .get("requestId")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(id) = request_id {
                if let Some(tx) = shared.pending.lock().unwrap().remove(&id) {
                    let _ = tx.send(envelope.clone());
                }
            }
        }
        Err(_) => {
            if let Some(handler) = shared.handler.lock().unwrap().clone() {
                handler(envelope);
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
    use crate::events::NullEventSink;
    use mesh_store::config::ValidationMode;

    async fn make_node() -> MeshNodeFacade {
        let identity = IdentityKeyPair::generate();
        let network_id = format!("test-{}", rand::random::<u64>());
        let state_dir = std::env::temp_dir().join(&network_id);
        let store = PeerEndpointStore::spawn(network_id, state_dir, ValidationMode::Permissive);
        MeshNodeFacade::new(identity, 0, store, Arc::new(NullEventSink))
            .await
            .expect("bind should succeed on an ephemeral port")
    }

    #[tokio::test]
    async fn ping_pong_round_trip_resolves() {
        let a = make_node().await;
        let b = make_node().await;

        b.learn_public_key(a.peer_id().to_string(), a.shared.identity.public_key());
        a.learn_public_key(b.peer_id().to_string(), b.shared.identity.public_key());

        let b_addr = SocketAddr::new([127, 0, 0, 1].into(), b.bound_port());
        let ping = serde_json::json!({ "type": "ping", "recentPeers": [] });

        let reply = a
            .send_and_receive(ping, Some(&b.peer_id()), b_addr, Duration::from_secs(2))
            .await
            .expect("ping should be answered with a pong");

        let parsed: FacadeMessage =
            serde_json::from_value(reply.payload).expect("pong decodes as a FacadeMessage");
        assert!(matches!(parsed, FacadeMessage::Pong { .. }));
    }

    #[tokio::test]
    async fn send_and_receive_times_out_with_no_responder() {
        let a = make_node().await;
        let unreachable = SocketAddr::new([127, 0, 0, 1].into(), 1);
        let payload = serde_json::json!({ "type": "ping", "recentPeers": [] });

        let err = a
            .send_and_receive(payload, None, unreachable, Duration::from_millis(50))
            .await
            .expect_err("nobody is listening, so this should time out");

        assert!(matches!(err, NetworkError::Timeout));
    }

    #[tokio::test]
    async fn unrecognized_payload_reaches_the_message_handler() {
        let a = make_node().await;
        let b = make_node().await;
        a.learn_public_key(b.peer_id().to_string(), b.shared.identity.public_key());
        b.learn_public_key(a.peer_id().to_string(), a.shared.identity.public_key());

        let (tx, rx) = oneshot::channel();
        let tx = StdMutex::new(Some(tx));
        b.on_message(Arc::new(move |envelope: Envelope| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(envelope);
            }
        }));

        let b_addr = SocketAddr::new([127, 0, 0, 1].into(), b.bound_port());
        let payload = serde_json::json!({ "hello": "world" });
        a.send(payload.clone(), Some(&b.peer_id()), b_addr)
            .await
            .expect("send should succeed");

        let received = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("handler should fire before the timeout")
            .expect("sender side of the oneshot was not dropped");

        assert_eq!(received.payload, payload);
    }
}
