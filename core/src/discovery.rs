// Local peer discovery: candidate identities supplied by an external service
//
// Advertising and scanning the LAN happens elsewhere. The coordinator only
// consumes the resulting candidates and tells clients which of them are
// registered right now and can therefore be sent a connection request.

use crate::identity::Identity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A peer reported by the discovery service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCandidate {
    pub identity: Identity,
    pub hostname: String,
}

impl PeerCandidate {
    pub fn new(identity: Identity, hostname: impl Into<String>) -> Self {
        Self {
            identity,
            hostname: hostname.into(),
        }
    }
}

/// Source of candidate peers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    async fn candidates(&self) -> anyhow::Result<Vec<PeerCandidate>>;
}

/// Fixed candidate list, for manual setups and tests
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    candidates: Vec<PeerCandidate>,
}

impl StaticDiscovery {
    pub fn new(candidates: Vec<PeerCandidate>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl DiscoveryProvider for StaticDiscovery {
    async fn candidates(&self) -> anyhow::Result<Vec<PeerCandidate>> {
        Ok(self.candidates.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_discovery_returns_candidates() {
        let candidate = PeerCandidate::new(Identity::parse("1001").unwrap(), "laptop.local");
        let provider = StaticDiscovery::new(vec![candidate.clone()]);

        let found = tokio_test::block_on(provider.candidates()).unwrap();
        assert_eq!(found, vec![candidate]);
    }

    #[test]
    fn test_candidate_json_shape() {
        let candidate: PeerCandidate =
            serde_json::from_str(r#"{"identity":2002,"hostname":"desk"}"#).unwrap();
        assert_eq!(candidate.identity.as_str(), "2002");
        assert_eq!(candidate.hostname, "desk");
    }
}
