//! Identity keypair persistence

use crate::persistence::paths::identity_file;
use crate::Result;
use mesh_crypto::IdentityKeyPair;
use std::path::Path;

/// Load the node's identity keypair from disk, generating and persisting a
/// new one on first run.
pub fn load_or_create() -> Result<IdentityKeyPair> {
    load_or_create_at(&identity_file())
}

/// Same as [`load_or_create`] but against an explicit path (for tests).
pub fn load_or_create_at(path: &Path) -> Result<IdentityKeyPair> {
    if let Ok(bytes) = std::fs::read(path) {
        if let Ok(keypair) = IdentityKeyPair::from_bytes(&bytes) {
            return Ok(keypair);
        }
    }
    let keypair = IdentityKeyPair::generate();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, keypair.to_bytes()?)?;
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_reuses_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        let first = load_or_create_at(&path).unwrap();
        let second = load_or_create_at(&path).unwrap();
        assert_eq!(first.peer_id(), second.peer_id());
    }

    #[test]
    fn corrupt_file_regenerates_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        std::fs::write(&path, b"garbage").unwrap();
        let keypair = load_or_create_at(&path).unwrap();
        let reread = std::fs::read(&path).unwrap();
        assert_eq!(reread, keypair.to_bytes().unwrap());
    }
}
