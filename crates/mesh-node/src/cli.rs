//! CLI argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mesh-node")]
#[command(author, version, about = "Mesh overlay node", long_about = None)]
pub struct Cli {
    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output in JSON format (machine-readable)
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (TOML). Defaults to the platform config dir.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a node: bind the transport, probe its NAT, and optionally
    /// register with a coordinator.
    Run(RunArgs),

    /// Show or regenerate this node's identity.
    Id(IdArgs),

    /// Classify this node's NAT type against a STUN server.
    NatProbe(NatProbeArgs),

    /// Inspect effective configuration.
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Local UDP port to bind (0 = OS-chosen). Overrides config.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Coordinator WebSocket URL to register with (e.g. ws://host:4900/ws).
    #[arg(long, env = "MESH_COORDINATOR")]
    pub coordinator: Option<String>,

    /// Network namespace for persisted endpoint state. Overrides config.
    #[arg(long)]
    pub network_id: Option<String>,

    /// Peer id to request a direct connection to once registered. Requires
    /// `--coordinator`.
    #[arg(long)]
    pub connect: Option<String>,
}

#[derive(Args)]
pub struct IdArgs {
    /// Replace the persisted identity with a freshly generated one.
    #[arg(long)]
    pub regenerate: bool,
}

#[derive(Args)]
pub struct NatProbeArgs {
    /// STUN server to probe against.
    #[arg(long, default_value = mesh_net::nat::stun::DEFAULT_STUN_SERVER)]
    pub stun_server: String,

    /// Local port to bind while probing (0 = OS-chosen).
    #[arg(short, long, default_value_t = 0)]
    pub port: u16,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration (file values merged over defaults).
    Show,
    /// Print the path to the configuration file.
    Path,
}
