//! Stable per-machine identifier
//!
//! A random UUID persisted at a well-known path. Used to disambiguate
//! multiple processes belonging to the same peer identity in
//! `PersistedEndpointFile::machines`.

use super::paths::machine_id_file;
use crate::Result;
use std::path::Path;
use uuid::Uuid;

/// Load this machine's id, generating and persisting a new one on first run.
pub fn load_or_create() -> Result<Uuid> {
    load_or_create_at(&machine_id_file())
}

/// Same as [`load_or_create`] but against an explicit path (for tests).
pub fn load_or_create_at(path: &Path) -> Result<Uuid> {
    if let Ok(text) = std::fs::read_to_string(path) {
        if let Ok(id) = text.trim().parse::<Uuid>() {
            return Ok(id);
        }
    }
    let id = Uuid::new_v4();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, id.to_string())?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_reuses_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine_id");
        let first = load_or_create_at(&path).unwrap();
        let second = load_or_create_at(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn corrupt_file_regenerates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine_id");
        std::fs::write(&path, "not a uuid").unwrap();
        let id = load_or_create_at(&path).unwrap();
        let reread = std::fs::read_to_string(&path).unwrap();
        assert_eq!(reread.trim(), id.to_string());
    }
}
