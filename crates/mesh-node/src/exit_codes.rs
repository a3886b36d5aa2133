//! Exit code constants

/// Success exit code
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Network error (bind failure, STUN timeout, coordinator unreachable)
pub const NETWORK_ERROR: i32 = 4;

/// Invalid configuration
pub const CONFIG_ERROR: i32 = 7;
