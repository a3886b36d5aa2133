//! Fixed-size binary hole-punch probe packet
//!
//! `magic[8] | sequence:u32 | timestamp:u64 | senderIdPrefix[16] | isResponse:u8`,
//! all multi-byte integers big-endian. 37 bytes on the wire, no allocation
//! beyond the output buffer.

/// `b"OMERTAHP"` — arbitrary but fixed, chosen to be unlikely to collide
/// with the leading bytes of any other protocol this transport might share
/// a UDP port with.
pub const PROBE_MAGIC: [u8; 8] = *b"OMERTAHP";

/// Wire size of a probe packet.
pub const PROBE_LEN: usize = 37;

/// A hole-punch probe packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Monotonic sequence number within a burst.
    pub sequence: u32,
    /// Sender's wall-clock send time, milliseconds since the epoch.
    pub timestamp: u64,
    /// First 16 bytes (UTF-8, zero-padded) of the sender's PeerId hex string.
    pub sender_id_prefix: [u8; 16],
    /// Whether this probe is a response to an incoming probe.
    pub is_response: bool,
}

impl Probe {
    /// Build a probe, truncating `sender_id` to its first 16 bytes and
    /// zero-padding if shorter.
    pub fn new(sequence: u32, timestamp: u64, sender_id: &str, is_response: bool) -> Self {
        let mut prefix = [0u8; 16];
        let bytes = sender_id.as_bytes();
        let take = bytes.len().min(16);
        prefix[..take].copy_from_slice(&bytes[..take]);
        Self {
            sequence,
            timestamp,
            sender_id_prefix: prefix,
            is_response,
        }
    }

    /// The sender id prefix as a string, trimmed at the first zero byte.
    pub fn sender_id(&self) -> String {
        let end = self
            .sender_id_prefix
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.sender_id_prefix.len());
        String::from_utf8_lossy(&self.sender_id_prefix[..end]).into_owned()
    }

    /// Serialize to the fixed 37-byte wire format.
    pub fn encode(&self) -> [u8; PROBE_LEN] {
        let mut out = [0u8; PROBE_LEN];
        out[0..8].copy_from_slice(&PROBE_MAGIC);
        out[8..12].copy_from_slice(&self.sequence.to_be_bytes());
        out[12..20].copy_from_slice(&self.timestamp.to_be_bytes());
        out[20..36].copy_from_slice(&self.sender_id_prefix);
        out[36] = self.is_response as u8;
        out
    }

    /// Parse a probe from bytes. Returns `None` unless `data.len() >= 37`
    /// and the leading 8 bytes match [`PROBE_MAGIC`].
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < PROBE_LEN || data[0..8] != PROBE_MAGIC {
            return None;
        }
        let sequence = u32::from_be_bytes(data[8..12].try_into().ok()?);
        let timestamp = u64::from_be_bytes(data[12..20].try_into().ok()?);
        let mut sender_id_prefix = [0u8; 16];
        sender_id_prefix.copy_from_slice(&data[20..36]);
        let is_response = data[36] != 0;
        Some(Self {
            sequence,
            timestamp,
            sender_id_prefix,
            is_response,
        })
    }

    /// Fast-path check used on the UDP receive path: does this datagram
    /// look like a probe at all? Only inspects the magic bytes.
    pub fn is_hole_punch_probe(data: &[u8]) -> bool {
        data.len() >= 8 && data[0..8] == PROBE_MAGIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let probe = Probe::new(7, 1_700_000_000_000, "abc123", false);
        let encoded = probe.encode();
        assert_eq!(encoded.len(), PROBE_LEN);
        let decoded = Probe::decode(&encoded).unwrap();
        assert_eq!(decoded, probe);
    }

    #[test]
    fn sender_id_prefix_truncates_long_ids() {
        let probe = Probe::new(0, 0, "0123456789abcdefFULL_LENGTH_AND_MORE", true);
        assert_eq!(probe.sender_id(), "0123456789abcdef");
    }

    #[test]
    fn sender_id_prefix_zero_pads_short_ids() {
        let probe = Probe::new(0, 0, "abc", false);
        assert_eq!(probe.sender_id(), "abc");
    }

    #[test]
    fn decode_rejects_short_input() {
        let probe = Probe::new(1, 2, "x", false);
        let encoded = probe.encode();
        assert!(Probe::decode(&encoded[..PROBE_LEN - 1]).is_none());
    }

    #[test]
    fn decode_rejects_wrong_magic() {
        let mut encoded = Probe::new(1, 2, "x", false).encode();
        encoded[0] ^= 0xFF;
        assert!(Probe::decode(&encoded).is_none());
    }

    #[test]
    fn is_hole_punch_probe_checks_only_magic() {
        let encoded = Probe::new(1, 2, "x", false).encode();
        assert!(Probe::is_hole_punch_probe(&encoded));
        assert!(!Probe::is_hole_punch_probe(b"not a probe"));
        assert!(!Probe::is_hole_punch_probe(b"short"));
    }

    #[test]
    fn is_response_flag_round_trips() {
        let response = Probe::new(1, 2, "x", true);
        let decoded = Probe::decode(&response.encode()).unwrap();
        assert!(decoded.is_response);
    }
}
