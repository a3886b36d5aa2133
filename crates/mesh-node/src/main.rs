//! mesh-node: CLI for running a mesh overlay node

#![forbid(unsafe_code)]

mod cli;
mod commands;
mod exit_codes;
mod logging;
mod runtime;

use clap::Parser;
use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(mesh_store::config::config_path);
    let config = match mesh_store::config::load_config_from(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration from {}: {e}", config_path.display());
            std::process::exit(exit_codes::CONFIG_ERROR);
        }
    };

    let json = cli.json;
    let rt = match runtime::build_runtime() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            std::process::exit(exit_codes::ERROR);
        }
    };

    let result = rt.block_on(async move {
        match cli.command {
            Commands::Run(args) => commands::run(args, config, json).await,
            Commands::Id(args) => commands::id(args, json),
            Commands::NatProbe(args) => commands::nat_probe(args, json).await,
            Commands::Config(args) => commands::config(args, config, config_path, json),
        }
    });

    match result {
        Ok(()) => std::process::exit(exit_codes::SUCCESS),
        Err(e) => {
            if json {
                println!("{}", serde_json::json!({ "error": e.to_string() }));
            } else {
                eprintln!("error: {e}");
            }
            std::process::exit(exit_codes::ERROR);
        }
    }
}
