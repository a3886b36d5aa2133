//! Stable peer identifiers derived from public keys

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CryptoError;
use crate::hash::blake3::hash;

/// A peer's stable identity: the BLAKE3 fingerprint of its Ed25519 public
/// key, hex-encoded for display and wire use.
///
/// Two identity keypairs derived from the same public key always produce
/// the same `PeerId` — it is a pure function of the key, not a random
/// handle assigned at startup.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Derive a `PeerId` from raw Ed25519 public key bytes.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        Self(hash(public_key))
    }

    /// Build a `PeerId` from an already-computed 32-byte fingerprint.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw fingerprint bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl FromStr for PeerId {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(CryptoError::InvalidKey(format!(
                "peer id must be 64 hex characters, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_pair = std::str::from_utf8(chunk)
                .map_err(|_| CryptoError::InvalidKey("peer id is not valid UTF-8".into()))?;
            bytes[i] = u8::from_str_radix(hex_pair, 16)
                .map_err(|_| CryptoError::InvalidKey("peer id contains non-hex characters".into()))?;
        }
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_public_key_yields_same_id() {
        let pk = [42u8; 32];
        assert_eq!(PeerId::from_public_key(&pk), PeerId::from_public_key(&pk));
    }

    #[test]
    fn different_public_keys_yield_different_ids() {
        let a = PeerId::from_public_key(&[1u8; 32]);
        let b = PeerId::from_public_key(&[2u8; 32]);
        assert_ne!(a, b);
    }

    #[test]
    fn display_and_parse_round_trip() {
        let id = PeerId::from_public_key(&[9u8; 32]);
        let text = id.to_string();
        assert_eq!(text.len(), 64);
        let parsed: PeerId = text.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!("abcd".parse::<PeerId>().is_err());
    }

    #[test]
    fn parse_rejects_non_hex() {
        let bad = "z".repeat(64);
        assert!(bad.parse::<PeerId>().is_err());
    }
}
