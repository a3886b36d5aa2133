//! Human-readable key fingerprints

/// Generate a colon-separated hex fingerprint from the first 16 bytes of a
/// BLAKE3 hash of the public key. Used for out-of-band identity verification.
pub fn fingerprint_hex(public_key: &[u8]) -> String {
    let hash = blake3::hash(public_key);
    hash.as_bytes()
        .iter()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Short fingerprint (8 hex chars) suitable for compact display.
pub fn fingerprint_short(public_key: &[u8]) -> String {
    let hash = blake3::hash(public_key);
    hash.as_bytes()
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_hex_format() {
        let key = [0u8; 32];
        let fp = fingerprint_hex(&key);
        let parts: Vec<&str> = fp.split(':').collect();
        assert_eq!(parts.len(), 16);
        for part in parts {
            assert_eq!(part.len(), 2);
        }
    }

    #[test]
    fn fingerprint_short_is_eight_chars() {
        let fp = fingerprint_short(&[2u8; 32]);
        assert_eq!(fp.len(), 8);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let key = [42u8; 32];
        assert_eq!(fingerprint_hex(&key), fingerprint_hex(&key));
    }

    #[test]
    fn different_keys_different_fingerprints() {
        assert_ne!(fingerprint_hex(&[0u8; 32]), fingerprint_hex(&[1u8; 32]));
    }
}
