//! Store error types

use std::fmt;

/// Storage layer errors
#[derive(Debug)]
pub enum StoreError {
    /// Configuration error
    ConfigError(String),
    /// Identity error
    IdentityError(String),
    /// Persistence error
    PersistenceError(String),
    /// Serialization error
    SerializationError(String),
    /// IO error
    Io(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Self::IdentityError(msg) => write!(f, "Identity error: {}", msg),
            Self::PersistenceError(msg) => write!(f, "Persistence error: {}", msg),
            Self::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(err: toml::ser::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<mesh_crypto::CryptoError> for StoreError {
    fn from(err: mesh_crypto::CryptoError) -> Self {
        Self::IdentityError(err.to_string())
    }
}
