//! NAT discovery, classification, and endpoint validation

pub mod stun;
pub mod types;
pub mod validator;

pub use stun::{StunClient, StunResult, DEFAULT_STUN_SERVER};
pub use types::{evaluate_compatibility, Compatibility, NatType, Strategy};
pub use validator::{filter_valid, format_endpoint, validate};
