//! Persistent storage utilities

pub mod machine_id;
pub mod paths;

pub use paths::{
    config_dir, config_file, data_dir, ensure_dirs, identity_file, legacy_peer_endpoints_file,
    machine_id_file, peer_endpoints_file, state_dir,
};
