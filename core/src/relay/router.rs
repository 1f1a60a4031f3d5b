//! Relay Router: forwards chat and file notices between paired identities

use super::protocol::{ChatMessage, FileNotice, RelayedChat, RelayedFile, ServerEvent};
use crate::identity::Identity;
use crate::pairing::PairingNegotiator;
use crate::registry::{Delivery, IdentityRegistry};
use crate::CoordinatorError;

/// How an authorized relay ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Queued on the recipient's connection
    Delivered,
    /// Recipient unreachable or backed up; dropped without error
    Dropped,
}

/// Borrowed view over the registry and pairing tables.
///
/// Built under the coordinator's state lock so authorization and delivery
/// see the same pairing state the negotiator last wrote.
pub struct RelayRouter<'a> {
    registry: &'a IdentityRegistry,
    negotiator: &'a PairingNegotiator,
}

impl<'a> RelayRouter<'a> {
    pub fn new(registry: &'a IdentityRegistry, negotiator: &'a PairingNegotiator) -> Self {
        Self {
            registry,
            negotiator,
        }
    }

    pub fn relay_chat(&self, message: ChatMessage) -> Result<RelayOutcome, CoordinatorError> {
        self.authorize(&message.from, &message.to)?;
        let to = message.to.clone();
        Ok(self.forward(&to, ServerEvent::ChatMessage(RelayedChat::from(message))))
    }

    /// File bytes never pass through here, only the storage metadata
    pub fn relay_file_notice(&self, notice: FileNotice) -> Result<RelayOutcome, CoordinatorError> {
        self.authorize(&notice.from, &notice.to)?;
        let to = notice.to.clone();
        Ok(self.forward(&to, ServerEvent::FileReceived(RelayedFile::from(notice))))
    }

    fn authorize(&self, from: &Identity, to: &Identity) -> Result<(), CoordinatorError> {
        if self.negotiator.are_paired(from, to) {
            Ok(())
        } else {
            Err(CoordinatorError::NotPaired {
                from: from.clone(),
                to: to.clone(),
            })
        }
    }

    fn forward(&self, to: &Identity, event: ServerEvent) -> RelayOutcome {
        let Some(handle) = self.registry.resolve(to) else {
            tracing::debug!("Recipient {} unreachable, dropping {}", to, event.event_name());
            return RelayOutcome::Dropped;
        };

        match handle.deliver(event) {
            Delivery::Queued => RelayOutcome::Delivered,
            Delivery::QueueFull | Delivery::Closed => RelayOutcome::Dropped,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
