//! Coordinator-as-relay: acts as the `relay_peer_id` for sessions it
//! allocates itself, forwarding relay data frames between the two peers'
//! WebSocket connections by token.
//!
//! Wraps `mesh_net::relay::RelaySessionManager` for lifecycle/capacity
//! bookkeeping; this module only owns the token -> outbound-sender mapping
//! needed to actually move bytes between the two legs of a session.

use std::sync::Arc;

use dashmap::DashMap;
use rand::RngCore;
use tokio::sync::mpsc;

/// One leg of a relay session: the WebSocket outbound channel for a peer
/// that has registered against a token.
#[derive(Clone)]
struct Leg {
    peer_id: String,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// Binds relay tokens to the (up to two) peer legs that have registered
/// against them, so a `frame::DATA` frame arriving from one leg can be
/// forwarded verbatim to the other.
#[derive(Clone, Default)]
pub struct RelayBridge {
    legs: Arc<DashMap<String, Vec<Leg>>>,
}

impl RelayBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh, unpredictable relay token.
    pub fn issue_token(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
        self.legs.insert(token.clone(), Vec::new());
        token
    }

    /// Register a peer's outbound binary-frame channel against `token`
    /// (sent as `frame::REGISTER`). A session accepts at most two legs.
    pub fn join(&self, token: &str, peer_id: String, outbound: mpsc::UnboundedSender<Vec<u8>>) {
        if let Some(mut legs) = self.legs.get_mut(token) {
            legs.retain(|l| l.peer_id != peer_id);
            if legs.len() < 2 {
                legs.push(Leg { peer_id, outbound });
            }
        }
    }

    /// Forward a `frame::DATA` payload from `peer_id` to the other leg of
    /// `token`'s session, if both legs are present. Returns `false` if there
    /// was nobody to forward to.
    pub fn forward(&self, token: &str, from_peer_id: &str, frame: Vec<u8>) -> bool {
        let Some(legs) = self.legs.get(token) else {
            return false;
        };
        for leg in legs.iter() {
            if leg.peer_id != from_peer_id {
                return leg.outbound.send(frame).is_ok();
            }
        }
        false
    }

    /// Drop a session's token entirely (both legs).
    pub fn close(&self, token: &str) {
        self.legs.remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_token_produces_distinct_32_char_hex_tokens() {
        let bridge = RelayBridge::new();
        let a = bridge.issue_token();
        let b = bridge.issue_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn forward_with_no_second_leg_returns_false() {
        let bridge = RelayBridge::new();
        let token = bridge.issue_token();
        let (tx, _rx) = mpsc::unbounded_channel();
        bridge.join(&token, "alice".to_string(), tx);
        assert!(!bridge.forward(&token, "alice", vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn forward_delivers_to_the_other_leg() {
        let bridge = RelayBridge::new();
        let token = bridge.issue_token();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        bridge.join(&token, "alice".to_string(), tx_a);
        bridge.join(&token, "bob".to_string(), tx_b);

        assert!(bridge.forward(&token, "alice", vec![9, 9, 9]));
        assert_eq!(rx_b.recv().await, Some(vec![9, 9, 9]));
    }

    #[test]
    fn unknown_token_forward_returns_false() {
        let bridge = RelayBridge::new();
        assert!(!bridge.forward("nope", "alice", vec![1]));
    }
}
