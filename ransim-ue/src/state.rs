//! UE mobility management state
//!
//! The UE tracks its registration status in an explicit state enum; events
//! that are not valid in the current state are rejected instead of being
//! inferred from which context fields happen to be populated.

use std::fmt;

/// 5GMM state of the simulated UE (TS 24.501 Section 5.1.3, reduced to the
/// states this simulator passes through).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MmState {
    /// Not registered with the network
    #[default]
    Deregistered,
    /// Registration request sent, waiting for the procedure to finish
    RegisteredInitiated,
    /// Registered
    Registered,
    /// UE-initiated deregistration in progress
    DeregisteredInitiated,
    /// Service request sent from idle
    ServiceRequestInitiated,
}

impl fmt::Display for MmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmState::Deregistered => write!(f, "5GMM-DEREGISTERED"),
            MmState::RegisteredInitiated => write!(f, "5GMM-REGISTERED-INITIATED"),
            MmState::Registered => write!(f, "5GMM-REGISTERED"),
            MmState::DeregisteredInitiated => write!(f, "5GMM-DEREGISTERED-INITIATED"),
            MmState::ServiceRequestInitiated => write!(f, "5GMM-SERVICE-REQUEST-INITIATED"),
        }
    }
}

impl MmState {
    /// True when the UE holds a registration with the network.
    pub fn is_registered(self) -> bool {
        matches!(
            self,
            MmState::Registered | MmState::DeregisteredInitiated | MmState::ServiceRequestInitiated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_deregistered() {
        assert_eq!(MmState::default(), MmState::Deregistered);
        assert!(!MmState::default().is_registered());
    }

    #[test]
    fn test_registered_predicate() {
        assert!(MmState::Registered.is_registered());
        assert!(MmState::DeregisteredInitiated.is_registered());
        assert!(!MmState::RegisteredInitiated.is_registered());
    }

    #[test]
    fn test_display() {
        assert_eq!(MmState::Registered.to_string(), "5GMM-REGISTERED");
    }
}
