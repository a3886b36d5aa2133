//! Configuration file loading and saving

use super::MeshConfig;
use crate::persistence::paths::config_file;
use crate::Result;
use std::path::{Path, PathBuf};

/// Load configuration from the default config file.
///
/// If the file does not exist, returns `MeshConfig::default()` without
/// error — a fresh node should run with sane defaults, not fail to start.
pub fn load_config() -> Result<MeshConfig> {
    load_config_from(&config_path())
}

/// Load configuration from a specific path.
pub fn load_config_from(path: &Path) -> Result<MeshConfig> {
    if !path.exists() {
        return Ok(MeshConfig::default());
    }
    let text = std::fs::read_to_string(path)?;
    let config: MeshConfig = toml::from_str(&text)?;
    Ok(config)
}

/// Save configuration to the default config file.
pub fn save_config(config: &MeshConfig) -> Result<()> {
    save_config_to(config, &config_path())
}

/// Save configuration to a specific path, creating parent directories as needed.
pub fn save_config_to(config: &MeshConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = toml::to_string_pretty(config)?;
    std::fs::write(path, text)?;
    Ok(())
}

/// Default configuration file path.
pub fn config_path() -> PathBuf {
    config_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.network_id, "default");
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.toml");
        let mut config = MeshConfig::default();
        config.network_id = "office".to_string();
        config.bind_port = 4242;
        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.network_id, "office");
        assert_eq!(loaded.bind_port, 4242);
    }
}
