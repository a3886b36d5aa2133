//! Default configuration values

use super::schema::*;

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            bind_port: 0,
            network_id: "default".to_string(),
            validation_mode: ValidationMode::default(),
            can_coordinate: false,
            coordinator: CoordinatorConfig::default(),
            hole_punch: HolePunchConfig::default(),
            relay: RelayConfig::default(),
            log_level: "info".to_string(),
            state_dir: None,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 256,
            invite_timeout_secs: 30,
            request_timeout_secs: 30,
            cleanup_interval_secs: 10,
        }
    }
}

impl Default for HolePunchConfig {
    fn default() -> Self {
        Self {
            probe_count: 5,
            probe_interval_ms: 200,
            timeout_ms: 10_000,
            send_response_probes: true,
            response_probe_count: 3,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            min_relays: 1,
            max_relays: 4,
            health_check_interval_secs: 60,
            max_total_sessions: 64,
        }
    }
}
