//! Identity Registry: binds self-asserted identities to live connection handles

use crate::identity::Identity;
use crate::relay::protocol::ServerEvent;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Opaque id of one duplex connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Result of a single delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Event is in the handle's outbound queue
    Queued,
    /// Outbound queue is full, event dropped
    QueueFull,
    /// The connection is gone, event dropped
    Closed,
}

impl Delivery {
    pub fn is_queued(&self) -> bool {
        matches!(self, Delivery::Queued)
    }
}

/// Sending side of one client connection.
///
/// Holding a handle does not keep the connection alive; once the connection
/// task drops its receiver the handle reports itself closed and every
/// delivery is discarded.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: HandleId,
    outbound: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(id: HandleId, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self { id, outbound }
    }

    /// Create a handle together with the receiver its connection task drains
    pub fn channel(id: HandleId, queue_depth: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Non-blocking, at-most-once delivery
    pub fn deliver(&self, event: ServerEvent) -> Delivery {
        match self.outbound.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    "Outbound queue full on {}, dropping {}",
                    self.id,
                    event.event_name()
                );
                Delivery::QueueFull
            }
            Err(TrySendError::Closed(event)) => {
                tracing::debug!("{} closed, dropping {}", self.id, event.event_name());
                Delivery::Closed
            }
        }
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// What a call to [`IdentityRegistry::register`] displaced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// Handle previously bound to the same identity (last write wins)
    pub replaced_handle: Option<HandleId>,
    /// Identity previously bound to the same handle, now gone from the registry
    pub displaced_identity: Option<Identity>,
}

/// Identity → handle table, plus the reverse index used on teardown.
///
/// `by_handle[h] == x` holds exactly when `by_identity[x]` is `h`.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    by_identity: HashMap<Identity, ConnectionHandle>,
    by_handle: HashMap<HandleId, Identity>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `handle`, replacing whatever either side was bound to
    pub fn register(&mut self, identity: Identity, handle: ConnectionHandle) -> Registration {
        let mut registration = Registration::default();

        if let Some(previous) = self.by_handle.remove(&handle.id()) {
            if previous != identity {
                self.by_identity.remove(&previous);
                registration.displaced_identity = Some(previous);
            }
        }

        let handle_id = handle.id();
        if let Some(old) = self.by_identity.insert(identity.clone(), handle) {
            if old.id() != handle_id {
                self.by_handle.remove(&old.id());
                registration.replaced_handle = Some(old.id());
            }
        }
        self.by_handle.insert(handle_id, identity);

        registration
    }

    /// Live handle for `identity`, if any.
    ///
    /// A handle whose channel has already closed resolves to nothing, even
    /// before its teardown has been processed.
    pub fn resolve(&self, identity: &Identity) -> Option<&ConnectionHandle> {
        self.by_identity
            .get(identity)
            .filter(|handle| !handle.is_closed())
    }

    /// Identity currently bound to `handle`
    pub fn identity_of(&self, handle: HandleId) -> Option<&Identity> {
        self.by_handle.get(&handle)
    }

    /// Remove whatever identity is bound to `handle`
    pub fn unregister(&mut self, handle: HandleId) -> Option<Identity> {
        let identity = self.by_handle.remove(&handle)?;
        self.by_identity.remove(&identity);
        Some(identity)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.resolve(identity).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
