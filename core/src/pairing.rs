//! Pairing Negotiator: pending connection requests and confirmed pairings

use crate::identity::Identity;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PairingError {
    #[error("{identity} is already paired with {partner}")]
    AlreadyPaired { identity: Identity, partner: Identity },
    #[error("Cannot pair {0} with itself")]
    SelfPairing(Identity),
}

/// What purging an identity removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Partner whose pairing was dissolved
    pub former_partner: Option<Identity>,
    /// Pending requests dropped, counting both directions
    pub requests_dropped: usize,
}

/// Negotiation tables.
///
/// Pending requests are keyed by target: every target holds the set of
/// requesters still waiting for an answer. Pairings are stored in both
/// directions and every mutation writes both entries.
#[derive(Debug, Default)]
pub struct PairingNegotiator {
    pending: HashMap<Identity, HashSet<Identity>>,
    pairings: HashMap<Identity, Identity>,
}

impl PairingNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending request from `from` to `to`; false if it already existed
    pub fn record_request(&mut self, from: &Identity, to: &Identity) -> bool {
        self.pending
            .entry(to.clone())
            .or_default()
            .insert(from.clone())
    }

    /// Drop the pending request from `from` to `to`; false if there was none
    pub fn take_request(&mut self, from: &Identity, to: &Identity) -> bool {
        let Some(requesters) = self.pending.get_mut(to) else {
            return false;
        };
        let removed = requesters.remove(from);
        if requesters.is_empty() {
            self.pending.remove(to);
        }
        removed
    }

    pub fn is_pending(&self, from: &Identity, to: &Identity) -> bool {
        self.pending
            .get(to)
            .map_or(false, |requesters| requesters.contains(from))
    }

    /// Requesters waiting on `target`, sorted
    pub fn pending_for(&self, target: &Identity) -> Vec<Identity> {
        let mut requesters: Vec<Identity> = self
            .pending
            .get(target)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        requesters.sort();
        requesters
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(|set| set.len()).sum()
    }

    /// Install a symmetric pairing.
    ///
    /// Returns `Ok(false)` when the two are already paired with each other.
    /// Fails if either side is paired with someone else.
    pub fn pair(&mut self, a: &Identity, b: &Identity) -> Result<bool, PairingError> {
        if a == b {
            return Err(PairingError::SelfPairing(a.clone()));
        }
        if self.are_paired(a, b) {
            return Ok(false);
        }
        for identity in [a, b] {
            if let Some(partner) = self.pairings.get(identity) {
                return Err(PairingError::AlreadyPaired {
                    identity: identity.clone(),
                    partner: partner.clone(),
                });
            }
        }

        self.pairings.insert(a.clone(), b.clone());
        self.pairings.insert(b.clone(), a.clone());
        Ok(true)
    }

    /// Dissolve the pairing `identity` belongs to, returning the former partner
    pub fn unpair(&mut self, identity: &Identity) -> Option<Identity> {
        let partner = self.pairings.remove(identity)?;
        if self.pairings.get(&partner) == Some(identity) {
            self.pairings.remove(&partner);
        }
        Some(partner)
    }

    pub fn partner_of(&self, identity: &Identity) -> Option<&Identity> {
        self.pairings.get(identity)
    }

    /// Pairing check that tolerates being asked in either orientation
    pub fn are_paired(&self, a: &Identity, b: &Identity) -> bool {
        self.pairings.get(a) == Some(b) || self.pairings.get(b) == Some(a)
    }

    pub fn pairing_count(&self) -> usize {
        self.pairings.len() / 2
    }

    /// Remove every trace of `identity`: requests it sent, requests sent to
    /// it, and its pairing.
    pub fn purge(&mut self, identity: &Identity) -> PurgeOutcome {
        let mut requests_dropped = self
            .pending
            .remove(identity)
            .map_or(0, |requesters| requesters.len());

        for requesters in self.pending.values_mut() {
            if requesters.remove(identity) {
                requests_dropped += 1;
            }
        }
        self.pending.retain(|_, requesters| !requesters.is_empty());

        PurgeOutcome {
            former_partner: self.unpair(identity),
            requests_dropped,
        }
    }

    /// True when every pairing entry has its mirror
    pub fn is_symmetric(&self) -> bool {
        self.pairings
            .iter()
            .all(|(a, b)| self.pairings.get(b) == Some(a))
    }

    /// True when `identity` appears nowhere in the tables
    pub fn is_absent(&self, identity: &Identity) -> bool {
        !self.pairings.contains_key(identity)
            && !self.pairings.values().any(|partner| partner == identity)
            && !self.pending.contains_key(identity)
            && !self.pending.values().any(|set| set.contains(identity))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(raw: &str) -> Identity {
        Identity::parse(raw).unwrap()
    }

    #[test]
    fn test_record_and_take_request() {
        let mut negotiator = PairingNegotiator::new();

        assert!(negotiator.record_request(&id("a"), &id("b")));
        assert!(negotiator.is_pending(&id("a"), &id("b")));
        assert!(!negotiator.is_pending(&id("b"), &id("a")));

        assert!(negotiator.take_request(&id("a"), &id("b")));
        assert!(!negotiator.take_request(&id("a"), &id("b")));
        assert_eq!(negotiator.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_requests_collapse() {
        let mut negotiator = PairingNegotiator::new();

        assert!(negotiator.record_request(&id("a"), &id("b")));
        assert!(!negotiator.record_request(&id("a"), &id("b")));
        assert_eq!(negotiator.pending_count(), 1);
    }

    #[test]
    fn test_multiple_requesters_per_target() {
        let mut negotiator = PairingNegotiator::new();

        negotiator.record_request(&id("c"), &id("t"));
        negotiator.record_request(&id("a"), &id("t"));
        negotiator.record_request(&id("b"), &id("t"));

        assert_eq!(
            negotiator.pending_for(&id("t")),
            vec![id("a"), id("b"), id("c")]
        );

        negotiator.take_request(&id("b"), &id("t"));
        assert_eq!(negotiator.pending_for(&id("t")), vec![id("a"), id("c")]);
    }

    #[test]
    fn test_pair_is_symmetric() {
        let mut negotiator = PairingNegotiator::new();

        assert_eq!(negotiator.pair(&id("a"), &id("b")), Ok(true));
        assert!(negotiator.are_paired(&id("a"), &id("b")));
        assert!(negotiator.are_paired(&id("b"), &id("a")));
        assert_eq!(negotiator.partner_of(&id("b")), Some(&id("a")));
        assert_eq!(negotiator.pairing_count(), 1);
    }

    #[test]
    fn test_repeat_pair_is_idempotent() {
        let mut negotiator = PairingNegotiator::new();

        negotiator.pair(&id("a"), &id("b")).unwrap();
        assert_eq!(negotiator.pair(&id("b"), &id("a")), Ok(false));
        assert_eq!(negotiator.pairing_count(), 1);
    }

    #[test]
    fn test_pair_rejects_when_already_paired_elsewhere() {
        let mut negotiator = PairingNegotiator::new();
        negotiator.pair(&id("a"), &id("b")).unwrap();

        let err = negotiator.pair(&id("c"), &id("a")).unwrap_err();
        assert_eq!(
            err,
            PairingError::AlreadyPaired {
                identity: id("a"),
                partner: id("b"),
            }
        );
        assert!(!negotiator.are_paired(&id("c"), &id("a")));
        assert!(negotiator.are_paired(&id("a"), &id("b")));
    }

    #[test]
    fn test_pair_rejects_self() {
        let mut negotiator = PairingNegotiator::new();
        assert_eq!(
            negotiator.pair(&id("a"), &id("a")),
            Err(PairingError::SelfPairing(id("a")))
        );
    }

    #[test]
    fn test_unpair_removes_both_sides() {
        let mut negotiator = PairingNegotiator::new();
        negotiator.pair(&id("a"), &id("b")).unwrap();

        assert_eq!(negotiator.unpair(&id("b")), Some(id("a")));
        assert!(!negotiator.are_paired(&id("a"), &id("b")));
        assert!(negotiator.partner_of(&id("a")).is_none());
        assert_eq!(negotiator.unpair(&id("a")), None);
    }

    #[test]
    fn test_purge_removes_requests_both_directions() {
        let mut negotiator = PairingNegotiator::new();
        negotiator.record_request(&id("x"), &id("t1"));
        negotiator.record_request(&id("x"), &id("t2"));
        negotiator.record_request(&id("r1"), &id("x"));
        negotiator.record_request(&id("r2"), &id("t1"));
        negotiator.pair(&id("x"), &id("p")).unwrap();

        let outcome = negotiator.purge(&id("x"));

        assert_eq!(outcome.former_partner, Some(id("p")));
        assert_eq!(outcome.requests_dropped, 3);
        assert!(negotiator.is_absent(&id("x")));
        assert!(negotiator.is_pending(&id("r2"), &id("t1")));
        assert!(negotiator.partner_of(&id("p")).is_none());
    }

    fn arb_identity() -> impl Strategy<Value = Identity> {
        "[a-e]".prop_map(|raw| Identity::parse(raw).unwrap())
    }

    #[derive(Debug, Clone)]
    enum Op {
        Request(Identity, Identity),
        Reject(Identity, Identity),
        Pair(Identity, Identity),
        Unpair(Identity),
        Purge(Identity),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (arb_identity(), arb_identity()).prop_map(|(a, b)| Op::Request(a, b)),
            (arb_identity(), arb_identity()).prop_map(|(a, b)| Op::Reject(a, b)),
            (arb_identity(), arb_identity()).prop_map(|(a, b)| Op::Pair(a, b)),
            arb_identity().prop_map(Op::Unpair),
            arb_identity().prop_map(Op::Purge),
        ]
    }

    proptest! {
        #[test]
        fn prop_tables_stay_symmetric_and_purge_is_total(ops in prop::collection::vec(arb_op(), 0..64)) {
            let mut negotiator = PairingNegotiator::new();

            for op in ops {
                match op {
                    Op::Request(a, b) => { negotiator.record_request(&a, &b); }
                    Op::Reject(a, b) => { negotiator.take_request(&a, &b); }
                    Op::Pair(a, b) => { let _ = negotiator.pair(&a, &b); }
                    Op::Unpair(a) => { negotiator.unpair(&a); }
                    Op::Purge(a) => {
                        negotiator.purge(&a);
                        prop_assert!(negotiator.is_absent(&a));
                    }
                }
                prop_assert!(negotiator.is_symmetric());
            }
        }
    }
}
