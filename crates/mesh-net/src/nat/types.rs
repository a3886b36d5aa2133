//! NAT type classification and hole-punch compatibility

use serde::{Deserialize, Serialize};

/// NAT type as classified by [`crate::nat::StunClient::detect_nat_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NatType {
    /// No NAT; the bound address is itself public.
    Public,
    /// Full cone: any external host can send to the mapped port.
    FullCone,
    /// Restricted cone: only hosts we've sent to can reply.
    RestrictedCone,
    /// Port-restricted cone: only the exact (host, port) we've sent to can reply.
    PortRestrictedCone,
    /// Symmetric: mapping depends on destination; hole punching is not possible.
    Symmetric,
    /// Classification failed or was never attempted.
    Unknown,
}

/// Traversal strategy chosen by the orchestrator for a given pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    /// Both sides probe concurrently.
    Simultaneous,
    /// We must create the mapping first (we're the more restricted side).
    InitiatorFirst,
    /// We wait for an incoming probe before responding.
    ResponderFirst,
}

/// Outcome of evaluating compatibility between an initiator and responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// A traversal strategy exists.
    Strategy(Strategy),
    /// Hole punching cannot succeed (both symmetric).
    Impossible,
}

impl NatType {
    /// Cone-family NATs (full/restricted/port-restricted) can hole-punch
    /// against most peers; symmetric and unknown cannot be assumed to.
    pub fn is_cone_type(self) -> bool {
        matches!(
            self,
            Self::FullCone | Self::RestrictedCone | Self::PortRestrictedCone
        )
    }

    /// Public addresses and full-cone NATs accept inbound traffic on their
    /// mapped endpoint without any prior outbound packet.
    pub fn is_directly_reachable(self) -> bool {
        matches!(self, Self::Public | Self::FullCone)
    }

    /// Whether this NAT type can, at all, participate in hole punching.
    pub fn can_hole_punch(self) -> bool {
        !matches!(self, Self::Symmetric)
    }

    /// Relative traversal difficulty, 0 (easiest) to 10 (hardest).
    pub fn difficulty(self) -> u8 {
        match self {
            Self::Public => 0,
            Self::FullCone => 2,
            Self::RestrictedCone => 4,
            Self::PortRestrictedCone => 6,
            Self::Symmetric => 10,
            Self::Unknown => 8,
        }
    }

    /// Ordering used for relay candidate scoring: lower is better
    /// reachability. `public > fullCone > restrictedCone > portRestrictedCone
    /// > symmetric`, matching the spec's relay scoring requirement.
    pub fn reachability_rank(self) -> u8 {
        match self {
            Self::Public => 4,
            Self::FullCone => 3,
            Self::RestrictedCone => 2,
            Self::PortRestrictedCone => 1,
            Self::Symmetric => 0,
            Self::Unknown => 0,
        }
    }
}

/// Evaluate hole-punch compatibility for an (initiator, responder) pair.
///
/// Total and deterministic for every {NATType × NATType} combination.
pub fn evaluate_compatibility(
    initiator: NatType,
    responder: NatType,
    initiator_endpoint_known: bool,
) -> Compatibility {
    use NatType::*;

    if initiator.is_directly_reachable() && responder.is_directly_reachable() {
        return Compatibility::Strategy(Strategy::Simultaneous);
    }
    if initiator == Symmetric && responder == Symmetric {
        return Compatibility::Impossible;
    }
    if initiator == Unknown || responder == Unknown {
        return Compatibility::Strategy(Strategy::Simultaneous);
    }
    if initiator == Symmetric && responder.is_cone_type() {
        return Compatibility::Strategy(Strategy::InitiatorFirst);
    }
    if initiator.is_cone_type() && responder == Symmetric {
        return Compatibility::Strategy(Strategy::ResponderFirst);
    }
    if initiator.is_cone_type() && responder.is_cone_type() {
        return Compatibility::Strategy(Strategy::Simultaneous);
    }
    // Directly-reachable paired with a cone/symmetric peer, endpoint unknown:
    // still attempt a simultaneous punch as the safe fallback.
    let _ = initiator_endpoint_known;
    Compatibility::Strategy(Strategy::Simultaneous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use NatType::*;

    #[test]
    fn both_symmetric_is_impossible() {
        assert_eq!(
            evaluate_compatibility(Symmetric, Symmetric, false),
            Compatibility::Impossible
        );
    }

    #[test]
    fn symmetric_vs_cone_is_initiator_first() {
        assert_eq!(
            evaluate_compatibility(Symmetric, RestrictedCone, false),
            Compatibility::Strategy(Strategy::InitiatorFirst)
        );
    }

    #[test]
    fn cone_vs_symmetric_is_responder_first() {
        assert_eq!(
            evaluate_compatibility(PortRestrictedCone, Symmetric, false),
            Compatibility::Strategy(Strategy::ResponderFirst)
        );
    }

    #[test]
    fn cone_vs_cone_is_simultaneous() {
        assert_eq!(
            evaluate_compatibility(FullCone, RestrictedCone, false),
            Compatibility::Strategy(Strategy::Simultaneous)
        );
    }

    #[test]
    fn directly_reachable_pair_is_simultaneous() {
        assert_eq!(
            evaluate_compatibility(Public, FullCone, true),
            Compatibility::Strategy(Strategy::Simultaneous)
        );
    }

    #[test]
    fn unknown_falls_back_to_simultaneous() {
        assert_eq!(
            evaluate_compatibility(Unknown, Symmetric, false),
            Compatibility::Strategy(Strategy::Simultaneous)
        );
        assert_eq!(
            evaluate_compatibility(FullCone, Unknown, false),
            Compatibility::Strategy(Strategy::Simultaneous)
        );
    }

    #[test]
    fn matrix_is_total() {
        let all = [
            Public,
            FullCone,
            RestrictedCone,
            PortRestrictedCone,
            Symmetric,
            Unknown,
        ];
        for &a in &all {
            for &b in &all {
                // must not panic, and must be deterministic
                let first = evaluate_compatibility(a, b, false);
                let second = evaluate_compatibility(a, b, false);
                assert_eq!(first, second);
            }
        }
    }

    #[test]
    fn reachability_rank_orders_correctly() {
        assert!(Public.reachability_rank() > FullCone.reachability_rank());
        assert!(FullCone.reachability_rank() > RestrictedCone.reachability_rank());
        assert!(RestrictedCone.reachability_rank() > PortRestrictedCone.reachability_rank());
        assert!(PortRestrictedCone.reachability_rank() > Symmetric.reachability_rank());
    }
}
