//! Connection Lifecycle Manager: retracts all state of a departing identity

use crate::identity::Identity;
use crate::pairing::{PairingNegotiator, PurgeOutcome};
use crate::registry::{Delivery, HandleId, IdentityRegistry};
use crate::relay::protocol::ServerEvent;

/// An identity that left, and what leaving removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub identity: Identity,
    pub purged: PurgeOutcome,
    /// Outcome of the `peer-disconnected` notice, if one was attempted
    pub notice: Option<Delivery>,
}

#[derive(Debug, Clone)]
pub struct LifecycleManager {
    notify_peer_disconnect: bool,
}

impl LifecycleManager {
    pub fn new(notify_peer_disconnect: bool) -> Self {
        Self {
            notify_peer_disconnect,
        }
    }

    /// Teardown of `handle`. Runs once per closed connection.
    ///
    /// Callers hold the coordinator's state lock, so no negotiation or relay
    /// can observe the identity half-removed.
    pub fn on_handle_closed(
        &self,
        registry: &mut IdentityRegistry,
        negotiator: &mut PairingNegotiator,
        handle: HandleId,
    ) -> Option<Departure> {
        let identity = registry.unregister(handle)?;
        let departure = self.retract(registry, negotiator, identity);

        tracing::debug!(
            "{} ({}) departed, dropped {} pending request(s)",
            departure.identity,
            handle,
            departure.purged.requests_dropped
        );

        Some(departure)
    }

    /// Remove `identity` from negotiation state after it has left the registry
    pub fn retract(
        &self,
        registry: &IdentityRegistry,
        negotiator: &mut PairingNegotiator,
        identity: Identity,
    ) -> Departure {
        let purged = negotiator.purge(&identity);
        let mut notice = None;

        if let Some(partner) = &purged.former_partner {
            tracing::info!("Pairing {} <-> {} ended by disconnect", identity, partner);

            if self.notify_peer_disconnect {
                notice = registry
                    .resolve(partner)
                    .map(|handle| handle.deliver(ServerEvent::peer_disconnected(identity.clone())));
            }
        }

        Departure {
            identity,
            purged,
            notice,
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new(true)
    }
}

// ============================================================================
// TESTS
// ============================================================================
