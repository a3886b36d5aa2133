//! Platform-specific well-known paths

use std::path::PathBuf;

const APP_DIR: &str = "mesh";

/// Configuration directory (e.g. `~/.config/mesh` on Linux).
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Data directory (e.g. `~/.local/share/mesh` on Linux).
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// State directory for runtime-mutable data (persisted endpoint stores, etc).
///
/// Falls back to the data directory on platforms without a distinct
/// state-dir concept (only Linux's XDG spec has one).
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(data_dir)
        .join(APP_DIR)
}

/// Path to the main configuration file.
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Path to the persisted identity keypair.
pub fn identity_file() -> PathBuf {
    config_dir().join("identity.key")
}

/// Path to the machine id file (one UUID string).
pub fn machine_id_file() -> PathBuf {
    config_dir().join("machine_id")
}

/// Path to the network-scoped persisted endpoint store.
pub fn peer_endpoints_file(state_dir: &std::path::Path, network_id: &str) -> PathBuf {
    state_dir
        .join("networks")
        .join(network_id)
        .join("peer_endpoints.json")
}

/// Pre-network-scoped location of the endpoint store, from before entries
/// were namespaced under `networks/<id>/`. Deleted once on first
/// construction of the endpoint store.
pub fn legacy_peer_endpoints_file(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("peer_endpoints.json")
}

/// Ensure the configuration and state directories exist.
pub fn ensure_dirs() -> std::io::Result<()> {
    std::fs::create_dir_all(config_dir())?;
    std::fs::create_dir_all(state_dir())?;
    Ok(())
}
