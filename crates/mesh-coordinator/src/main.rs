//! Mesh coordinator server
//!
//! Runs the public-node rendezvous role: accepts `SignalingClient`
//! connections, brokers hole-punch requests via `mesh_net::coordinator`, and
//! bridges relay data frames for peers that can't reach each other directly.

mod config;
mod rate_limit;
mod registry;
mod relay_bridge;
mod server;
mod websocket;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::CoordinatorConfig;

#[derive(Parser)]
#[command(name = "mesh-coordinator")]
#[command(about = "Mesh overlay rendezvous/coordinator server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator server.
    Serve {
        /// Server bind address, overriding the config file.
        #[arg(short, long)]
        addr: Option<String>,
        /// Configuration file (TOML). Defaults applied for anything absent.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { addr, config } => {
            let mut cfg = match config {
                Some(path) => CoordinatorConfig::load_from(&path)?,
                None => CoordinatorConfig::default(),
            };
            if let Some(addr) = addr {
                cfg.bind_addr = addr;
            }

            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.log_level.clone())),
                )
                .init();

            server::run(cfg).await
        }
    }
}
