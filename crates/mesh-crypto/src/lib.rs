//! # Mesh Cryptography Library
//!
//! Identity keypairs, peer fingerprints, and envelope signing primitives for
//! the mesh NAT-traversal overlay.
//!
//! ## Features
//!
//! - **Stable identity**: an Ed25519 keypair whose BLAKE3 fingerprint is the
//!   peer's [`PeerId`] — cryptographic, independent of the host it runs on.
//! - **Memory safety**: keypairs zeroize on drop.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod hash;
pub mod keys;
pub mod peer_id;
pub mod sig;

pub use error::{CryptoError, Result};
pub use keys::IdentityKeyPair;
pub use peer_id::PeerId;

/// Library version constant
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
