//! Bidirectional signaling channel to a rendezvous server

pub mod client;
pub mod protocol;

pub use client::{SignalingClient, DEFAULT_RECEIVE_TIMEOUT};
pub use protocol::{ClientMessage, ServerMessage};
