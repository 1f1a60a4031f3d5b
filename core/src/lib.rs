// PairLink Core: pairing state machine and message relay
//
// Identities register on a connection, negotiate a pairing, and only then
// may exchange chat and file notices through the coordinator. All state is
// in memory and dies with the process.

pub mod coordinator;
pub mod discovery;
pub mod identity;
pub mod lifecycle;
pub mod pairing;
pub mod registry;
pub mod relay;

use thiserror::Error;

pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorStats};
pub use discovery::{DiscoveryProvider, PeerCandidate, StaticDiscovery};
pub use identity::{Identity, IdentityError};
pub use lifecycle::{Departure, LifecycleManager};
pub use pairing::{PairingError, PairingNegotiator, PurgeOutcome};
pub use registry::{ConnectionHandle, Delivery, HandleId, IdentityRegistry};
pub use relay::{ClientEvent, ProtocolError, RelayOutcome, ServerEvent};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Failures scoped to one client's request. None of them affect other
/// sessions or the coordinator itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Peer {0} not found")]
    PeerNotFound(Identity),
    #[error("{0} is not registered")]
    NotRegistered(Identity),
    #[error("{from} is not paired with {to}")]
    NotPaired { from: Identity, to: Identity },
    #[error("{identity} is already paired with {partner}")]
    AlreadyPaired { identity: Identity, partner: Identity },
    #[error("An identity cannot pair with itself")]
    SelfRequest,
    #[error("Invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),
}

impl CoordinatorError {
    /// Stable code sent to clients as the error payload
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::PeerNotFound(_) => "PeerNotFound",
            CoordinatorError::NotRegistered(_) => "NotRegistered",
            CoordinatorError::NotPaired { .. } => "NotPaired",
            CoordinatorError::AlreadyPaired { .. } => "AlreadyPaired",
            CoordinatorError::SelfRequest => "SelfRequest",
            CoordinatorError::InvalidIdentity(_) => "InvalidIdentity",
        }
    }

    /// Relay failures go out as `message-error`, everything else as `request-error`
    pub fn is_message_error(&self) -> bool {
        matches!(self, CoordinatorError::NotPaired { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_and_channels() {
        let ghost = Identity::parse("ghost").unwrap();
        let err = CoordinatorError::PeerNotFound(ghost.clone());
        assert_eq!(err.code(), "PeerNotFound");
        assert!(!err.is_message_error());

        let err = CoordinatorError::NotPaired {
            from: ghost.clone(),
            to: ghost,
        };
        assert_eq!(err.code(), "NotPaired");
        assert!(err.is_message_error());

        let err = CoordinatorError::NotRegistered(Identity::parse("nobody").unwrap());
        assert_eq!(err.code(), "NotRegistered");
        assert!(!err.is_message_error());

        let err: CoordinatorError = IdentityError::Empty.into();
        assert_eq!(err.code(), "InvalidIdentity");
    }
}
