//! Connected-peer directory
//!
//! Tracks each registered peer's best-known endpoint/NAT type plus the
//! outbound channel used to push server messages to its WebSocket
//! connection. Backed by `DashMap` for lock-free concurrent access across
//! connection tasks, the same structure the teacher's `RoomManager` used for
//! its peer table.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use mesh_net::coordinator::PeerLookup;
use mesh_net::nat::types::NatType;
use mesh_net::signaling::ServerMessage;

/// What the coordinator knows about one connected peer.
#[derive(Clone)]
pub struct PeerRecord {
    pub endpoint: Option<SocketAddr>,
    pub nat_type: NatType,
    pub public_key: Option<[u8; 32]>,
    pub outbound: mpsc::UnboundedSender<ServerMessage>,
}

/// Shared directory of currently-connected peers.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<DashMap<String, PeerRecord>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer_id: String, outbound: mpsc::UnboundedSender<ServerMessage>) {
        self.peers.insert(
            peer_id,
            PeerRecord {
                endpoint: None,
                nat_type: NatType::Unknown,
                public_key: None,
                outbound,
            },
        );
    }

    pub fn report_endpoint(&self, peer_id: &str, endpoint: SocketAddr, nat_type: NatType) {
        if let Some(mut record) = self.peers.get_mut(peer_id) {
            record.endpoint = Some(endpoint);
            record.nat_type = nat_type;
        }
    }

    pub fn set_public_key(&self, peer_id: &str, public_key: [u8; 32]) {
        if let Some(mut record) = self.peers.get_mut(peer_id) {
            record.public_key = Some(public_key);
        }
    }

    pub fn get(&self, peer_id: &str) -> Option<PeerRecord> {
        self.peers.get(peer_id).map(|r| r.clone())
    }

    pub fn send_to(&self, peer_id: &str, message: ServerMessage) -> bool {
        match self.peers.get(peer_id) {
            Some(record) => record.outbound.send(message).is_ok(),
            None => false,
        }
    }

    pub fn remove(&self, peer_id: &str) {
        self.peers.remove(peer_id);
    }
}

/// Adapts [`PeerRegistry`] to the lookup contract `CoordinatorService` needs,
/// without handing the coordinator the whole registry (it only ever needs
/// read-only endpoint/NAT-type lookups).
pub struct RegistryLookup(pub PeerRegistry);

impl PeerLookup for RegistryLookup {
    fn lookup(&self, peer_id: &str) -> Option<(SocketAddr, NatType)> {
        let record = self.0.get(peer_id)?;
        Some((record.endpoint?, record.nat_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new([127, 0, 0, 1].into(), port)
    }

    #[test]
    fn lookup_is_none_until_endpoint_reported() {
        let registry = PeerRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("alice".to_string(), tx);

        let lookup = RegistryLookup(registry.clone());
        assert!(lookup.lookup("alice").is_none());

        registry.report_endpoint("alice", addr(4000), NatType::FullCone);
        assert_eq!(lookup.lookup("alice"), Some((addr(4000), NatType::FullCone)));
    }

    #[test]
    fn send_to_unknown_peer_returns_false() {
        let registry = PeerRegistry::new();
        assert!(!registry.send_to("nobody", ServerMessage::Pong));
    }

    #[tokio::test]
    async fn send_to_delivers_on_the_outbound_channel() {
        let registry = PeerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("alice".to_string(), tx);

        assert!(registry.send_to("alice", ServerMessage::Pong));
        assert!(matches!(rx.recv().await, Some(ServerMessage::Pong)));
    }

    #[test]
    fn remove_drops_the_peer() {
        let registry = PeerRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("alice".to_string(), tx);
        registry.remove("alice");
        assert!(registry.get("alice").is_none());
    }
}
