//! Static-static ECDH over P-256
//!
//! Both endpoints multiply the other side's public point by their own private
//! scalar. By ECDH correctness the two results are the same curve point, which
//! is kept in full (`X || Y`) as the pair's shared secret.
//!
//! # Security Properties
//!
//! - **No forward secrecy**: keys are long-term, so the same pair always derives
//!   the same secret
//! - **No authentication**: a first-contact public key is trusted as presented
//! - **Point validation**: peer coordinates are checked against the curve equation
//!   before any scalar multiplication

use std::fmt;

use p256::elliptic_curve::sec1::ToEncodedPoint;

use super::keys::{fingerprint, KeyError, PointBytes, PublicKey, SecretKey, COORDINATE_SIZE};

/// Size of a shared secret in bytes (`X || Y` of the ECDH result point)
pub const SHARED_SECRET_SIZE: usize = 2 * COORDINATE_SIZE;

/// Result point of a Diffie-Hellman exchange in canonical `X || Y` form
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    pub fn from_bytes(bytes: [u8; SHARED_SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

impl SecretKey {
    /// Multiply a validated peer point by this key's scalar
    pub fn diffie_hellman(&self, peer: &PublicKey) -> SharedSecret {
        let scalar = self.inner().to_nonzero_scalar();
        let point = (peer.inner().to_projective() * *scalar).to_affine();
        let encoded = point.to_encoded_point(false);

        let mut out = [0u8; SHARED_SECRET_SIZE];
        // prime order group with a non-zero scalar: the product is never the identity
        if let (Some(x), Some(y)) = (encoded.x(), encoded.y()) {
            out[..COORDINATE_SIZE].copy_from_slice(x);
            out[COORDINATE_SIZE..].copy_from_slice(y);
        }
        SharedSecret(out)
    }
}

/// Derive the shared secret between a local private scalar and raw peer coordinates
///
/// # Errors
///
/// Returns [`KeyError::InvalidPeerKey`] if `peer` is not a point on P-256.
pub fn derive_shared_secret(
    local: &SecretKey,
    peer: &PointBytes,
) -> Result<SharedSecret, KeyError> {
    let peer = PublicKey::from_bytes(peer)?;
    Ok(local.diffie_hellman(&peer))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::keys::PUBLIC_KEY_SIZE;

    #[test]
    fn test_agreement_is_symmetric() {
        let alice = SecretKey::generate().unwrap();
        let bob = SecretKey::generate().unwrap();

        let ab = derive_shared_secret(&alice, &bob.public().to_bytes()).unwrap();
        let ba = derive_shared_secret(&bob, &alice.public().to_bytes()).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_agreement_is_deterministic() {
        let alice = SecretKey::generate().unwrap();
        let bob = SecretKey::generate().unwrap().public();

        assert_eq!(alice.diffie_hellman(&bob), alice.diffie_hellman(&bob));
    }

    #[test]
    fn test_distinct_peers_give_distinct_secrets() {
        let alice = SecretKey::generate().unwrap();
        let bob = SecretKey::generate().unwrap().public();
        let carol = SecretKey::generate().unwrap().public();

        assert_ne!(alice.diffie_hellman(&bob), alice.diffie_hellman(&carol));
    }

    #[test]
    fn test_all_zero_peer_yields_invalid_peer_key() {
        let alice = SecretKey::generate().unwrap();
        let result = derive_shared_secret(&alice, &[0u8; PUBLIC_KEY_SIZE]);
        assert!(matches!(result, Err(KeyError::InvalidPeerKey)));
    }

    #[test]
    fn test_off_curve_peer_yields_invalid_peer_key() {
        let alice = SecretKey::generate().unwrap();
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        bytes[31] = 1;
        bytes[63] = 1;
        let result = derive_shared_secret(&alice, &bytes);
        assert!(matches!(result, Err(KeyError::InvalidPeerKey)));
    }

    #[test]
    fn test_secret_is_not_the_public_point() {
        let alice = SecretKey::generate().unwrap();
        let bob = SecretKey::generate().unwrap().public();

        let shared = alice.diffie_hellman(&bob);
        assert_ne!(shared.as_bytes(), &bob.to_bytes());
    }
}
