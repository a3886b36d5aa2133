//! Network error types

use std::fmt;

/// Network layer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// A key was the wrong size for the scheme in use.
    InvalidKeySize,
    /// An envelope's signature did not verify.
    BadSignature,
    /// Bytes could not be decoded into the expected structure.
    DecodeError(String),
    /// An endpoint string failed validation.
    InvalidEndpoint(String),
    /// Binding a UDP socket failed.
    BindFailed(String),
    /// A socket operation failed.
    SocketError(String),
    /// An operation exceeded its deadline.
    Timeout,
    /// An operation was explicitly cancelled.
    Cancelled,
    /// Both peers are behind symmetric NATs; hole punching is not possible.
    BothSymmetric,
    /// No coordinator is known/reachable for this request.
    NoCoordinator,
    /// A capacity-bounded component is full.
    AtCapacity,
    /// The signaling channel is not connected.
    NotConnected,
    /// A requested peer is not known.
    PeerNotFound,
    /// An envelope with this messageId was already processed (dropped silently by callers).
    DuplicateMessage,
    /// I/O error.
    Io(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKeySize => write!(f, "invalid key size"),
            Self::BadSignature => write!(f, "signature verification failed"),
            Self::DecodeError(msg) => write!(f, "decode error: {}", msg),
            Self::InvalidEndpoint(msg) => write!(f, "invalid endpoint: {}", msg),
            Self::BindFailed(msg) => write!(f, "bind failed: {}", msg),
            Self::SocketError(msg) => write!(f, "socket error: {}", msg),
            Self::Timeout => write!(f, "operation timed out"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::BothSymmetric => write!(f, "both peers are behind symmetric NATs"),
            Self::NoCoordinator => write!(f, "no coordinator available"),
            Self::AtCapacity => write!(f, "at capacity"),
            Self::NotConnected => write!(f, "not connected"),
            Self::PeerNotFound => write!(f, "peer not found"),
            Self::DuplicateMessage => write!(f, "duplicate message"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
