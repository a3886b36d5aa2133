//! Coordinator server configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Coordinator server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Server bind address.
    pub bind_addr: String,
    /// Maximum concurrent in-flight hole-punch requests (spec
    /// `coordinator.maxConcurrent`).
    pub max_concurrent: usize,
    /// Seconds a request may sit at `inviteSent` before expiring.
    pub invite_timeout_secs: u64,
    /// Seconds a request may run before expiring outright.
    pub request_timeout_secs: u64,
    /// Cleanup sweep interval, in seconds.
    pub cleanup_interval_secs: u64,
    /// Maximum concurrent relay sessions this coordinator will broker.
    pub max_relay_sessions: usize,
    /// Requests per second allowed per source IP before `429`.
    pub rate_limit_per_second: u32,
    /// `RUST_LOG`-style filter directive.
    pub log_level: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4900".to_string(),
            max_concurrent: mesh_net::coordinator::DEFAULT_MAX_CONCURRENT,
            invite_timeout_secs: mesh_net::coordinator::DEFAULT_INVITE_TIMEOUT.as_secs(),
            request_timeout_secs: mesh_net::coordinator::DEFAULT_REQUEST_TIMEOUT.as_secs(),
            cleanup_interval_secs: mesh_net::coordinator::DEFAULT_CLEANUP_INTERVAL.as_secs(),
            max_relay_sessions: 256,
            rate_limit_per_second: 50,
            log_level: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load from a TOML file, falling back to defaults if it doesn't exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Cleanup sweep interval as a [`Duration`].
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoordinatorConfig::load_from(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:4900");
    }

    #[test]
    fn parses_a_partial_toml_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator.toml");
        std::fs::write(&path, "bind_addr = \"0.0.0.0:9000\"\n").unwrap();
        let config = CoordinatorConfig::load_from(&path).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.max_concurrent, mesh_net::coordinator::DEFAULT_MAX_CONCURRENT);
    }
}
