//! Cryptographic key management

pub mod identity;

pub use identity::IdentityKeyPair;
