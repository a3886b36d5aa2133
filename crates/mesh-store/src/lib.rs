//! Mesh persistent storage layer
//!
//! Manages configuration, the stable identity keypair, and the well-known
//! filesystem paths the node uses for state.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod identity;
pub mod persistence;

pub use error::StoreError;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
