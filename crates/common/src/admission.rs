//! Admission control for peers that are not yet members
//!
//! The decision itself comes from outside the core: an operator at a console,
//! a static policy, a test closure. Anything that can answer yes or no for a
//! given public point implements [`AdmissionOracle`].

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::crypto::PublicKey;

/// Answer for a first-contact peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Derive a shared secret and persist the peer as a member
    Admit,
    /// Do not persist; continue on the fallback secret
    Reject,
}

impl From<bool> for AdmissionDecision {
    fn from(admit: bool) -> Self {
        if admit {
            AdmissionDecision::Admit
        } else {
            AdmissionDecision::Reject
        }
    }
}

/// Source of admission decisions
///
/// Called once per connection from an unknown peer. Implementations may block
/// for as long as they like; the handshake applies its own timeout around the
/// call when one is configured.
#[async_trait]
pub trait AdmissionOracle: Send + Sync + Debug {
    async fn decide(&self, peer: &PublicKey) -> AdmissionDecision;
}

/// Fixed answer for every peer
#[derive(Debug, Clone, Copy)]
pub struct StaticAdmission(pub AdmissionDecision);

impl StaticAdmission {
    pub fn admit_all() -> Self {
        Self(AdmissionDecision::Admit)
    }

    pub fn reject_all() -> Self {
        Self(AdmissionDecision::Reject)
    }
}

#[async_trait]
impl AdmissionOracle for StaticAdmission {
    async fn decide(&self, peer: &PublicKey) -> AdmissionDecision {
        tracing::debug!(peer = %peer.fingerprint(), decision = ?self.0, "static admission");
        self.0
    }
}

/// Decision made by a synchronous closure
#[derive(Clone)]
pub struct FnAdmission(Arc<dyn Fn(&PublicKey) -> AdmissionDecision + Send + Sync>);

impl FnAdmission {
    pub fn new(f: impl Fn(&PublicKey) -> AdmissionDecision + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl Debug for FnAdmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnAdmission(..)")
    }
}

#[async_trait]
impl AdmissionOracle for FnAdmission {
    async fn decide(&self, peer: &PublicKey) -> AdmissionDecision {
        (self.0)(peer)
    }
}
