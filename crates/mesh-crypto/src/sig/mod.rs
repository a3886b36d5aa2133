//! Digital signature schemes
//!
//! Only Ed25519 is needed: identity keys and envelope signatures.

pub mod ed25519;

pub use ed25519::Ed25519Signer;
