//! Signed, deduplicated application message envelopes
//!
//! The wire format is canonical JSON: `{messageId, fromPeerId, toPeerId,
//! timestamp, payload, signature}`. The signed bytes are the same object
//! with `signature` absent, so verification re-serializes and compares.

use std::collections::{HashSet, VecDeque};

use mesh_crypto::{IdentityKeyPair, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::NetworkError;
use crate::Result;

/// Maximum number of recently-seen message ids retained for deduplication.
pub const DEDUP_CAPACITY: usize = 10_000;

/// A signed envelope wrapping an application-level payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique id for this message, generated by the sender.
    pub message_id: String,
    /// Sender's PeerId.
    pub from_peer_id: String,
    /// Intended recipient's PeerId, if directed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_peer_id: Option<String>,
    /// Sender's wall-clock send time, milliseconds since the epoch.
    pub timestamp: u64,
    /// Application payload.
    pub payload: Value,
    /// Ed25519 signature (hex-encoded) over the canonical bytes of every
    /// other field.
    pub signature: String,
}

/// Outcome of deduplicating an incoming envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First time this messageId has been seen.
    Fresh,
    /// Already processed; caller should drop silently.
    Duplicate,
}

/// Codec for signing, verifying, encoding, and deduplicating envelopes.
pub struct EnvelopeCodec {
    seen: VecDeque<String>,
    seen_set: HashSet<String>,
}

impl EnvelopeCodec {
    /// Create a codec with an empty dedup cache.
    pub fn new() -> Self {
        Self {
            seen: VecDeque::new(),
            seen_set: HashSet::new(),
        }
    }

    /// Sign a payload, producing a fresh envelope addressed to `to` (or
    /// broadcast if `None`).
    pub fn sign(
        identity: &IdentityKeyPair,
        payload: Value,
        to: Option<&PeerId>,
        now_ms: u64,
    ) -> Envelope {
        let message_id = Uuid::new_v4().to_string();
        let from_peer_id = identity.peer_id().to_string();
        let to_peer_id = to.map(|p| p.to_string());

        let signable = signable_bytes(&message_id, &from_peer_id, &to_peer_id, now_ms, &payload);
        let signature = hex_encode(&identity.sign(&signable));

        Envelope {
            message_id,
            from_peer_id,
            to_peer_id,
            timestamp: now_ms,
            payload,
            signature,
        }
    }

    /// Verify an envelope's signature against a known public key.
    pub fn verify(envelope: &Envelope, public_key: &[u8; 32]) -> Result<()> {
        let signable = signable_bytes(
            &envelope.message_id,
            &envelope.from_peer_id,
            &envelope.to_peer_id,
            envelope.timestamp,
            &envelope.payload,
        );
        let signature = hex_decode(&envelope.signature)
            .ok_or_else(|| NetworkError::DecodeError("signature is not valid hex".into()))?;
        mesh_crypto::keys::identity::verify(public_key, &signable, &signature)
            .map_err(|_| NetworkError::BadSignature)
    }

    /// Encode an envelope to its canonical JSON wire form.
    pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
        serde_json::to_vec(envelope).map_err(|e| NetworkError::DecodeError(e.to_string()))
    }

    /// Decode an envelope from its wire form.
    pub fn decode(bytes: &[u8]) -> Result<Envelope> {
        serde_json::from_slice(bytes).map_err(|e| NetworkError::DecodeError(e.to_string()))
    }

    /// Check and record a messageId against the dedup cache.
    ///
    /// Evicts the oldest half of entries once the cache reaches
    /// [`DEDUP_CAPACITY`], so a long-running process never grows this
    /// structure unboundedly.
    pub fn dedupe(&mut self, envelope: &Envelope) -> DedupOutcome {
        if self.seen_set.contains(&envelope.message_id) {
            return DedupOutcome::Duplicate;
        }
        if self.seen.len() >= DEDUP_CAPACITY {
            let evict = DEDUP_CAPACITY / 2;
            for _ in 0..evict {
                if let Some(old) = self.seen.pop_front() {
                    self.seen_set.remove(&old);
                }
            }
        }
        self.seen.push_back(envelope.message_id.clone());
        self.seen_set.insert(envelope.message_id.clone());
        DedupOutcome::Fresh
    }

    /// Whether a messageId is currently in the dedup cache (test/debug use).
    pub fn contains(&self, message_id: &str) -> bool {
        self.seen_set.contains(message_id)
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize the fields that participate in the signature, in a fixed
/// field order, so sender and verifier always agree on the signed bytes.
fn signable_bytes(
    message_id: &str,
    from_peer_id: &str,
    to_peer_id: &Option<String>,
    timestamp: u64,
    payload: &Value,
) -> Vec<u8> {
    #[derive(Serialize)]
    struct Signable<'a> {
        message_id: &'a str,
        from_peer_id: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        to_peer_id: &'a Option<String>,
        timestamp: u64,
        payload: &'a Value,
    }
    serde_json::to_vec(&Signable {
        message_id,
        from_peer_id,
        to_peer_id,
        timestamp,
        payload,
    })
    .expect("serde_json::Value serialization is infallible")
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sign_then_verify_succeeds() {
        let identity = IdentityKeyPair::generate();
        let envelope = EnvelopeCodec::sign(&identity, json!({"hello": "world"}), None, 1_000);
        assert!(EnvelopeCodec::verify(&envelope, &identity.public_key()).is_ok());
    }

    #[test]
    fn bit_flip_in_signed_region_rejects() {
        let identity = IdentityKeyPair::generate();
        let mut envelope = EnvelopeCodec::sign(&identity, json!({"hello": "world"}), None, 1_000);
        envelope.timestamp += 1;
        assert!(EnvelopeCodec::verify(&envelope, &identity.public_key()).is_err());
    }

    #[test]
    fn wrong_public_key_rejects() {
        let identity = IdentityKeyPair::generate();
        let other = IdentityKeyPair::generate();
        let envelope = EnvelopeCodec::sign(&identity, json!({}), None, 1_000);
        assert!(EnvelopeCodec::verify(&envelope, &other.public_key()).is_err());
    }

    #[test]
    fn encode_decode_round_trip() {
        let identity = IdentityKeyPair::generate();
        let envelope = EnvelopeCodec::sign(&identity, json!({"n": 1}), None, 42);
        let bytes = EnvelopeCodec::encode(&envelope).unwrap();
        let decoded = EnvelopeCodec::decode(&bytes).unwrap();
        assert_eq!(decoded.message_id, envelope.message_id);
        assert_eq!(decoded.payload, envelope.payload);
    }

    #[test]
    fn dedupe_sees_duplicates_once() {
        let identity = IdentityKeyPair::generate();
        let envelope = EnvelopeCodec::sign(&identity, json!({}), None, 0);
        let mut codec = EnvelopeCodec::new();
        assert_eq!(codec.dedupe(&envelope), DedupOutcome::Fresh);
        assert_eq!(codec.dedupe(&envelope), DedupOutcome::Duplicate);
        assert!(codec.contains(&envelope.message_id));
    }

    #[test]
    fn dedupe_evicts_oldest_half_when_full() {
        let mut codec = EnvelopeCodec::new();
        let identity = IdentityKeyPair::generate();
        let mut first_id = String::new();
        for i in 0..=DEDUP_CAPACITY {
            let envelope = EnvelopeCodec::sign(&identity, json!({"i": i}), None, i as u64);
            if i == 0 {
                first_id = envelope.message_id.clone();
            }
            codec.dedupe(&envelope);
        }
        // the very first recorded id is long gone after a full eviction cycle
        assert!(!codec.contains(&first_id));
        assert!(codec.seen.len() <= DEDUP_CAPACITY);
    }

    #[test]
    fn decode_rejects_malformed_bytes() {
        assert!(EnvelopeCodec::decode(b"not json").is_err());
    }
}
