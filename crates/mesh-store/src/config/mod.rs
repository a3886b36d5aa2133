//! Configuration management

pub mod defaults;
pub mod loader;
pub mod schema;

pub use loader::{config_path, load_config, load_config_from, save_config, save_config_to};
pub use schema::{
    CoordinatorConfig, HolePunchConfig, MeshConfig, RelayConfig, ValidationMode,
};
