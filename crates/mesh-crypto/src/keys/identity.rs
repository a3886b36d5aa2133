//! Long-term identity key pairs

use crate::error::Result;
use crate::peer_id::PeerId;
use crate::sig::Ed25519Signer;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Long-lived identity key pair.
///
/// The [`PeerId`] is a BLAKE3 fingerprint of the public key, derived once at
/// generation/load time and cached — it never changes for the lifetime of
/// the keypair.
#[derive(Clone, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
pub struct IdentityKeyPair {
    signer: Ed25519Signer,
    #[zeroize(skip)]
    id: PeerId,
}

impl IdentityKeyPair {
    /// Generate a new identity keypair.
    pub fn generate() -> Self {
        let signer = Ed25519Signer::keygen();
        let id = PeerId::from_public_key(&signer.verifying_key_bytes());
        Self { signer, id }
    }

    /// Reconstruct a keypair from a 32-byte seed (used when loading a
    /// persisted identity from disk).
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signer = Ed25519Signer::from_seed(seed);
        let id = PeerId::from_public_key(&signer.verifying_key_bytes());
        Self { signer, id }
    }

    /// The stable peer identifier (fingerprint of the public key).
    pub fn peer_id(&self) -> &PeerId {
        &self.id
    }

    /// Raw public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.signer.verifying_key_bytes()
    }

    /// Sign a message with the long-term identity key.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signer.sign(message)
    }

    /// Serialize the keypair (including secret key material) to bytes for
    /// persistence. Callers are responsible for storing this securely.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(Into::into)
    }

    /// Deserialize a keypair previously produced by [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(Into::into)
    }
}

/// Verify a signature against a raw Ed25519 public key.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<()> {
    crate::sig::ed25519::verify(public_key, message, signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_distinct_ids() {
        let a = IdentityKeyPair::generate();
        let b = IdentityKeyPair::generate();
        assert_ne!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn from_seed_is_deterministic() {
        let seed = [7u8; 32];
        let a = IdentityKeyPair::from_seed(seed);
        let b = IdentityKeyPair::from_seed(seed);
        assert_eq!(a.peer_id(), b.peer_id());
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let kp = IdentityKeyPair::generate();
        let msg = b"hello mesh";
        let sig = kp.sign(msg);
        assert!(verify(&kp.public_key(), msg, &sig).is_ok());
    }

    #[test]
    fn verify_rejects_flipped_bit() {
        let kp = IdentityKeyPair::generate();
        let msg = b"hello mesh";
        let mut sig = kp.sign(msg);
        sig[0] ^= 0x01;
        assert!(verify(&kp.public_key(), msg, &sig).is_err());
    }

    #[test]
    fn round_trips_through_bytes() {
        let kp = IdentityKeyPair::generate();
        let bytes = kp.to_bytes().unwrap();
        let restored = IdentityKeyPair::from_bytes(&bytes).unwrap();
        assert_eq!(kp.peer_id(), restored.peer_id());
    }
}
