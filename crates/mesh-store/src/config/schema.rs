//! Configuration schema

use serde::{Deserialize, Serialize};

/// Top-level mesh node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Local UDP port to bind (0 = OS-chosen).
    pub bind_port: u16,
    /// Namespaces persisted endpoint data; changing it starts a peer store clean.
    pub network_id: String,
    /// Strictness of `EndpointValidator`.
    pub validation_mode: ValidationMode,
    /// Whether this node runs a `CoordinatorService` for other peers.
    pub can_coordinate: bool,
    /// Coordinator caps and timers.
    pub coordinator: CoordinatorConfig,
    /// ProbeEngine tuning.
    pub hole_punch: HolePunchConfig,
    /// Relay manager caps.
    pub relay: RelayConfig,
    /// Tracing log level filter (e.g. "info", "mesh_net=debug").
    pub log_level: String,
    /// Override for the state directory; `None` uses the platform default.
    pub state_dir: Option<std::path::PathBuf>,
}

/// Strictness mode for `EndpointValidator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Reject anything that doesn't look like a routable public endpoint.
    #[default]
    Strict,
    /// Accept private/loopback endpoints too (useful for local testing).
    Permissive,
}

/// Coordinator caps and timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Maximum number of pending connection requests the coordinator will track at once.
    pub max_concurrent: usize,
    /// How long an invited peer has to respond before the invite expires.
    pub invite_timeout_secs: u64,
    /// How long a connection request may remain pending before it times out.
    pub request_timeout_secs: u64,
    /// Interval between sweeps that evict expired pending requests.
    pub cleanup_interval_secs: u64,
}

/// `ProbeEngine` tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HolePunchConfig {
    /// Number of probe packets sent per burst.
    pub probe_count: u32,
    /// Milliseconds between probes within a burst.
    pub probe_interval_ms: u64,
    /// Overall timeout for a hole-punch attempt, in milliseconds.
    pub timeout_ms: u64,
    /// Whether to send response probes back to a peer that probed us first.
    pub send_response_probes: bool,
    /// Number of response probes to send when `send_response_probes` is set.
    pub response_probe_count: u32,
}

/// Relay manager caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Minimum number of relay candidates to keep warm.
    pub min_relays: usize,
    /// Maximum number of relay candidates tracked at once.
    pub max_relays: usize,
    /// Interval between relay health checks, in seconds.
    pub health_check_interval_secs: u64,
    /// Maximum number of simultaneously active relay sessions across all peers.
    pub max_total_sessions: usize,
}
