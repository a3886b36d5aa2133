//! Cryptographic hash functions and utilities
//!
//! BLAKE3 is the only hash this crate needs: peer fingerprints and
//! envelope dedup keys.

pub mod blake3;

pub use self::blake3::{derive_key, hash, keyed_hash};
