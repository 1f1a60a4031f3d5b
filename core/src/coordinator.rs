//! Coordinator: the single owner of registry, negotiation and pairing state
//!
//! Every operation takes the state lock once, performs its transition, and
//! enqueues resulting events before releasing it. Enqueueing never blocks, so
//! the lock is never held across a wait on a peer.

use crate::discovery::{DiscoveryProvider, PeerCandidate};
use crate::identity::{Identity, IdentityError};
use crate::lifecycle::{Departure, LifecycleManager};
use crate::pairing::{PairingError, PairingNegotiator};
use crate::registry::{ConnectionHandle, Delivery, HandleId, IdentityRegistry};
use crate::relay::protocol::{ChatMessage, ClientEvent, FileNotice, ProtocolError, ServerEvent};
use crate::relay::router::{RelayOutcome, RelayRouter};
use crate::CoordinatorError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Capacity of each connection's outbound queue
    pub outbound_queue_depth: usize,
    /// Longest identity accepted at registration
    pub max_identity_len: usize,
    /// Tell the former partner when a paired identity disconnects
    pub notify_peer_disconnect: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            outbound_queue_depth: 64,
            max_identity_len: 64,
            notify_peer_disconnect: true,
        }
    }
}

/// Snapshot of coordinator activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub identities_registered: usize,
    pub pending_requests: usize,
    pub active_pairings: usize,
    pub chats_relayed: u64,
    pub file_notices_relayed: u64,
    pub deliveries_dropped: u64,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    registry: IdentityRegistry,
    negotiator: PairingNegotiator,
}

#[derive(Debug, Default)]
struct RelayCounters {
    chats_relayed: AtomicU64,
    file_notices_relayed: AtomicU64,
    deliveries_dropped: AtomicU64,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    lifecycle: LifecycleManager,
    state: Mutex<CoordinatorState>,
    counters: RelayCounters,
    next_handle: AtomicU64,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        Self {
            lifecycle: LifecycleManager::new(config.notify_peer_disconnect),
            config,
            state: Mutex::new(CoordinatorState::default()),
            counters: RelayCounters::default(),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Allocate a handle for a freshly accepted connection
    pub fn open_handle(&self) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let id = HandleId::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        ConnectionHandle::channel(id, self.config.outbound_queue_depth)
    }

    // ------------------------------------------------------------------------
    // Identity Registry
    // ------------------------------------------------------------------------

    /// Bind `identity` to `handle` (last registration wins)
    pub fn register(
        &self,
        handle: &ConnectionHandle,
        identity: Identity,
    ) -> Result<(), CoordinatorError> {
        if identity.len() > self.config.max_identity_len {
            return Err(IdentityError::TooLong {
                max: self.config.max_identity_len,
            }
            .into());
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let registration = state.registry.register(identity.clone(), handle.clone());

        if let Some(old) = registration.replaced_handle {
            tracing::debug!("{} re-registered, {} -> {}", identity, old, handle.id());
        }
        // A handle carries one identity; the one it used to carry is gone
        if let Some(displaced) = registration.displaced_identity {
            let departure = self
                .lifecycle
                .retract(&state.registry, &mut state.negotiator, displaced.clone());
            self.count_departure(&departure);
            tracing::debug!("{} replaced {} on {}", identity, displaced, handle.id());
        }

        tracing::debug!("Registered {} on {}", identity, handle.id());
        Ok(())
    }

    pub fn resolve(&self, identity: &Identity) -> Option<ConnectionHandle> {
        self.state.lock().registry.resolve(identity).cloned()
    }

    // ------------------------------------------------------------------------
    // Pairing Negotiator
    // ------------------------------------------------------------------------

    /// Offer a pairing from `from` to `to`.
    ///
    /// `from` must be registered, so every pending request is withdrawn when
    /// its requester disconnects.
    pub fn request_connection(&self, from: &Identity, to: &Identity) -> Result<(), CoordinatorError> {
        if from == to {
            return Err(CoordinatorError::SelfRequest);
        }

        let mut state = self.state.lock();
        if !state.registry.contains(from) {
            return Err(CoordinatorError::NotRegistered(from.clone()));
        }
        let target = state
            .registry
            .resolve(to)
            .cloned()
            .ok_or_else(|| CoordinatorError::PeerNotFound(to.clone()))?;

        if !state.negotiator.record_request(from, to) {
            tracing::debug!("Duplicate connection request {} -> {}", from, to);
        }
        self.deliver(&target, ServerEvent::connection_request(from.clone()));

        tracing::debug!("Connection request {} -> {}", from, to);
        Ok(())
    }

    /// `to` accepts the request made by `from`; both become paired.
    ///
    /// If either identity is not registered the call does nothing.
    pub fn accept_connection(&self, from: &Identity, to: &Identity) -> Result<(), CoordinatorError> {
        if from == to {
            return Err(CoordinatorError::SelfRequest);
        }

        let mut state = self.state.lock();
        let (Some(from_handle), Some(to_handle)) = (
            state.registry.resolve(from).cloned(),
            state.registry.resolve(to).cloned(),
        ) else {
            tracing::debug!("Ignoring accept {} -> {}: peer not registered", from, to);
            return Ok(());
        };

        let created = state.negotiator.pair(from, to).map_err(|e| match e {
            PairingError::AlreadyPaired { identity, partner } => {
                CoordinatorError::AlreadyPaired { identity, partner }
            }
            PairingError::SelfPairing(_) => CoordinatorError::SelfRequest,
        })?;
        state.negotiator.take_request(from, to);

        self.deliver(&from_handle, ServerEvent::connection_accepted(to.clone()));
        self.deliver(&to_handle, ServerEvent::connection_accepted(from.clone()));

        if created {
            tracing::info!("Pairing established {} <-> {}", from, to);
        }
        Ok(())
    }

    /// `to` declines the request made by `from`; only `from` is told
    pub fn reject_connection(&self, from: &Identity, to: &Identity) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock();
        state.negotiator.take_request(from, to);

        match state.registry.resolve(from) {
            Some(handle) => {
                self.deliver(handle, ServerEvent::connection_rejected(to.clone()));
                tracing::debug!("Connection request {} -> {} rejected", from, to);
            }
            None => tracing::debug!("Ignoring reject {} -> {}: requester gone", from, to),
        }
        Ok(())
    }

    /// Dissolve the pairing between `from` and `to`, telling both
    pub fn end_pairing(&self, from: &Identity, to: &Identity) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock();
        if !state.negotiator.are_paired(from, to) {
            return Err(CoordinatorError::NotPaired {
                from: from.clone(),
                to: to.clone(),
            });
        }
        state.negotiator.unpair(from);

        for (member, other) in [(from, to), (to, from)] {
            if let Some(handle) = state.registry.resolve(member) {
                self.deliver(handle, ServerEvent::pairing_ended(other.clone()));
            }
        }

        tracing::info!("Pairing {} <-> {} ended", from, to);
        Ok(())
    }

    pub fn are_paired(&self, a: &Identity, b: &Identity) -> bool {
        self.state.lock().negotiator.are_paired(a, b)
    }

    pub fn pending_for(&self, target: &Identity) -> Vec<Identity> {
        self.state.lock().negotiator.pending_for(target)
    }

    // ------------------------------------------------------------------------
    // Relay Router
    // ------------------------------------------------------------------------

    pub fn relay_chat(&self, message: ChatMessage) -> Result<RelayOutcome, CoordinatorError> {
        let state = self.state.lock();
        let outcome = RelayRouter::new(&state.registry, &state.negotiator).relay_chat(message)?;
        self.count_relay(outcome, &self.counters.chats_relayed);
        Ok(outcome)
    }

    pub fn relay_file_notice(&self, notice: FileNotice) -> Result<RelayOutcome, CoordinatorError> {
        let state = self.state.lock();
        let outcome =
            RelayRouter::new(&state.registry, &state.negotiator).relay_file_notice(notice)?;
        self.count_relay(outcome, &self.counters.file_notices_relayed);
        Ok(outcome)
    }

    // ------------------------------------------------------------------------
    // Connection Lifecycle
    // ------------------------------------------------------------------------

    /// Teardown for a closed connection, returning the identity it carried
    pub fn disconnect(&self, handle: HandleId) -> Option<Identity> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let departure =
            self.lifecycle
                .on_handle_closed(&mut state.registry, &mut state.negotiator, handle)?;
        self.count_departure(&departure);
        Some(departure.identity)
    }

    // ------------------------------------------------------------------------
    // Event dispatch
    // ------------------------------------------------------------------------

    /// Apply one inbound event from `caller`, reporting failures back to it
    pub fn dispatch(&self, caller: &ConnectionHandle, event: ClientEvent) {
        tracing::debug!("{} -> {}", caller.id(), event.event_name());

        let result = match event {
            ClientEvent::Register(identity) => self.register(caller, identity),
            ClientEvent::SendConnectionRequest(route) => {
                self.request_connection(&route.from, &route.to)
            }
            ClientEvent::AcceptConnection(route) => self.accept_connection(&route.from, &route.to),
            ClientEvent::RejectConnection(route) => self.reject_connection(&route.from, &route.to),
            ClientEvent::EndPairing(route) => self.end_pairing(&route.from, &route.to),
            ClientEvent::ChatMessage(message) => self.relay_chat(message).map(|_| ()),
            ClientEvent::FileUploadNotice(notice) => self.relay_file_notice(notice).map(|_| ()),
        };

        if let Err(err) = result {
            self.report(caller, &err);
        }
    }

    /// Send `err` to `caller` on the channel its class belongs to
    pub fn report(&self, caller: &ConnectionHandle, err: &CoordinatorError) {
        tracing::debug!("Reporting {} to {}: {}", err.code(), caller.id(), err);
        let event = if err.is_message_error() {
            ServerEvent::message_error(err.code())
        } else {
            ServerEvent::request_error(err.code())
        };
        self.deliver(caller, event);
    }

    /// Tell `caller` its frame could not be decoded
    pub fn report_protocol_error(&self, caller: &ConnectionHandle, err: &ProtocolError) {
        tracing::debug!("Undecodable frame from {}: {}", caller.id(), err);
        self.deliver(caller, ServerEvent::request_error(err.code()));
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Keep only candidates that are registered right now
    pub fn reachable_candidates(&self, candidates: Vec<PeerCandidate>) -> Vec<PeerCandidate> {
        let state = self.state.lock();
        candidates
            .into_iter()
            .filter(|candidate| state.registry.contains(&candidate.identity))
            .collect()
    }

    pub async fn discover_reachable<P>(&self, provider: &P) -> anyhow::Result<Vec<PeerCandidate>>
    where
        P: DiscoveryProvider + ?Sized,
    {
        let candidates = provider.candidates().await?;
        Ok(self.reachable_candidates(candidates))
    }

    // ------------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------------

    pub fn stats(&self) -> CoordinatorStats {
        let state = self.state.lock();
        CoordinatorStats {
            identities_registered: state.registry.len(),
            pending_requests: state.negotiator.pending_count(),
            active_pairings: state.negotiator.pairing_count(),
            chats_relayed: self.counters.chats_relayed.load(Ordering::Relaxed),
            file_notices_relayed: self.counters.file_notices_relayed.load(Ordering::Relaxed),
            deliveries_dropped: self.counters.deliveries_dropped.load(Ordering::Relaxed),
        }
    }

    fn deliver(&self, handle: &ConnectionHandle, event: ServerEvent) -> Delivery {
        let delivery = handle.deliver(event);
        if !delivery.is_queued() {
            self.counters.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
        }
        delivery
    }

    fn count_departure(&self, departure: &Departure) {
        if departure.notice.is_some_and(|delivery| !delivery.is_queued()) {
            self.counters.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn count_relay(&self, outcome: RelayOutcome, counter: &AtomicU64) {
        match outcome {
            RelayOutcome::Delivered => counter.fetch_add(1, Ordering::Relaxed),
            RelayOutcome::Dropped => self.counters.deliveries_dropped.fetch_add(1, Ordering::Relaxed),
        };
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
