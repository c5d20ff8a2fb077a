use session::ParticipantId;

use crate::host::Host;
use crate::plane::ControlPlane;

/// Participant actions held back until the participant is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Move,
    Chat,
    Interact,
    PickUp,
    Drop,
    DealDamage,
    TakeDamage,
    Target,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::Move,
        Capability::Chat,
        Capability::Interact,
        Capability::PickUp,
        Capability::Drop,
        Capability::DealDamage,
        Capability::TakeDamage,
        Capability::Target,
    ];
}

impl<H: Host> ControlPlane<H> {
    /// Every gated capability requires a verified session.
    pub fn is_allowed(&self, id: ParticipantId, capability: Capability) -> bool {
        let allowed = self.verification.is_verified(id);
        if !allowed {
            tracing::trace!(participant = %id, ?capability, "capability denied");
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;

    #[test]
    fn unknown_identity_is_denied_everything() {
        let mut h = Harness::new();
        let ghost = ParticipantId::random();
        for cap in Capability::ALL {
            assert!(!h.plane().is_allowed(ghost, cap));
        }
    }

    #[test]
    fn verified_identity_is_allowed_everything() {
        let mut h = Harness::new();
        let alice = h.connect("alice");
        h.plane().verify_participant(alice);
        assert!(!h.plane().is_allowed(alice, Capability::Move));
        assert!(h.run_until(|p| p.is_verified(alice)));
        for cap in Capability::ALL {
            assert!(h.plane().is_allowed(alice, cap));
        }
    }
}
