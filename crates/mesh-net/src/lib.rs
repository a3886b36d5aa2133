//! NAT traversal, signed/deduplicated transport, hole punching, relay, and
//! rendezvous signaling for the mesh overlay
//!
//! See each module for its contract. [`facade::MeshNodeFacade`] is the
//! entry point most callers want; everything else composes underneath it.

#![forbid(unsafe_code)]

pub mod coordinator;
pub mod endpoint_store;
pub mod envelope;
pub mod error;
pub mod events;
pub mod facade;
pub mod nat;
pub mod orchestrator;
pub mod probe;
pub mod probe_engine;
pub mod relay;
pub mod retry;
pub mod signaling;
pub mod transport;

pub use error::NetworkError;
pub use facade::MeshNodeFacade;

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
