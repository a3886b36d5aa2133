//! Wire messages exchanged with a rendezvous server
//!
//! Each message is a single JSON text frame discriminated by `type`. An
//! absent or unknown `type` is a decode error, never silently ignored.

use serde::{Deserialize, Serialize};

use crate::nat::types::NatType;

/// Client → server messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Announce this peer on a network.
    Register {
        /// This peer's PeerId (hex).
        peer_id: String,
        /// The logical network this peer belongs to.
        network_id: String,
    },
    /// Report a freshly observed reachable endpoint and NAT classification.
    ReportEndpoint {
        /// The observed endpoint, `host:port` or `[host]:port`.
        endpoint: String,
        /// This peer's current NAT classification.
        nat_type: NatType,
    },
    /// Ask the server to broker a connection to `target`.
    RequestConnection {
        /// The PeerId to connect to.
        target: String,
        /// This peer's public signing key (hex), so `target` can verify us.
        my_public_key: String,
    },
    /// Tell the server this peer is ready to execute its punch directive.
    HolePunchReady,
    /// Tell the server a new endpoint was observed mid-punch (port change).
    HolePunchSent {
        /// The endpoint traffic is now observed coming from.
        new_endpoint: String,
    },
    /// Report the outcome of a punch attempt back to the server.
    HolePunchResult {
        /// The peer this attempt was against.
        target: String,
        /// Whether direct connectivity was established.
        success: bool,
        /// The endpoint connectivity was established through, if successful.
        #[serde(skip_serializing_if = "Option::is_none")]
        actual_endpoint: Option<String>,
    },
    /// Ask the server to assign a relay for `target`.
    RequestRelay {
        /// The peer a relay is needed to reach.
        target: String,
    },
    /// Keepalive / liveness check.
    Ping,
}

/// Server → client messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Registration accepted.
    Registered {
        /// The server's clock, milliseconds since the epoch.
        server_time: u64,
    },
    /// A peer's endpoint and NAT type, relayed for connection setup.
    PeerEndpoint {
        /// The peer this describes.
        peer_id: String,
        /// Its best-known endpoint.
        endpoint: String,
        /// Its NAT classification.
        nat_type: NatType,
        /// Its public signing key (hex).
        public_key: String,
    },
    /// The chosen traversal strategy, carried as a single flag per the
    /// locked-in wire format (never a parallel strategy enum).
    HolePunchStrategy {
        /// `true` if both sides should punch at the same time.
        simultaneous: bool,
    },
    /// Directive to a coordinator-selected initiator: punch now.
    HolePunchNow {
        /// The endpoint to punch towards.
        target_endpoint: String,
    },
    /// Directive telling this peer it initiates the punch burst.
    HolePunchInitiate {
        /// The endpoint to punch towards.
        target_endpoint: String,
    },
    /// Directive telling this peer to wait for an incoming probe first.
    HolePunchWait,
    /// A newer endpoint for the counterpart appeared; continue punching it.
    HolePunchContinue {
        /// The updated endpoint to punch towards.
        new_endpoint: String,
    },
    /// A relay has been assigned for this session.
    RelayAssigned {
        /// The relay's endpoint.
        endpoint: String,
        /// The opaque token this peer presents to the relay.
        token: String,
    },
    /// Keepalive reply.
    Pong,
    /// The server rejected the last message.
    Error {
        /// Human-readable rejection reason.
        message: String,
    },
}
