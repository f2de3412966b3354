use std::fmt;

use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, FieldBytes};

/// Size of a P-256 private scalar in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of a single P-256 affine coordinate in bytes
pub const COORDINATE_SIZE: usize = 32;
/// Size of a raw P-256 public point (`X || Y`, no SEC1 tag) in bytes
pub const PUBLIC_KEY_SIZE: usize = 2 * COORDINATE_SIZE;

/// Raw 64-byte public point as it travels on the wire and sits in the store
pub type PointBytes = [u8; PUBLIC_KEY_SIZE];

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The supplied coordinates do not describe a point on P-256
    #[error("invalid peer key: point is not on the P-256 curve")]
    InvalidPeerKey,
    /// The private scalar is zero or not below the curve order
    #[error("invalid secret key: scalar out of range")]
    InvalidSecretKey,
    /// The OS random source failed
    #[error("entropy source failed: {0}")]
    Entropy(String),
}

/// Public half of a P-256 keypair
///
/// Always holds a point that has been validated to lie on the curve. The wire
/// and storage form is the uncompressed affine pair `X || Y` without the SEC1
/// `0x04` tag.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

impl PublicKey {
    /// Parse and validate a raw `X || Y` point
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidPeerKey`] if the coordinates are not on the curve.
    /// The all-zero point is rejected here as well.
    pub fn from_bytes(bytes: &PointBytes) -> Result<Self, KeyError> {
        let mut x = FieldBytes::default();
        x.copy_from_slice(&bytes[..COORDINATE_SIZE]);
        let mut y = FieldBytes::default();
        y.copy_from_slice(&bytes[COORDINATE_SIZE..]);
        let encoded = EncodedPoint::from_affine_coordinates(&x, &y, false);
        Option::from(p256::PublicKey::from_encoded_point(&encoded))
            .map(PublicKey)
            .ok_or(KeyError::InvalidPeerKey)
    }

    /// Raw `X || Y` encoding
    pub fn to_bytes(&self) -> PointBytes {
        let encoded = self.0.to_encoded_point(false);
        let mut out = [0u8; PUBLIC_KEY_SIZE];
        // a validated public key is never the identity, so both coordinates are present
        if let (Some(x), Some(y)) = (encoded.x(), encoded.y()) {
            out[..COORDINATE_SIZE].copy_from_slice(x);
            out[COORDINATE_SIZE..].copy_from_slice(y);
        }
        out
    }

    /// Convert public key to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Short hex prefix for log lines
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.to_bytes())
    }

    pub(crate) fn inner(&self) -> &p256::PublicKey {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.fingerprint()).finish()
    }
}

/// Secret half of a P-256 keypair
///
/// Never leaves the local store except on the reject path of admission,
/// where its bytes double as the weak fallback cipher secret.
#[derive(Clone)]
pub struct SecretKey(p256::SecretKey);

impl SecretKey {
    /// Generate a new random secret key using the OS random source
    ///
    /// Candidate scalars outside `[1, n)` are discarded and redrawn. A failure
    /// of the random source itself is returned, not retried.
    pub fn generate() -> Result<Self, KeyError> {
        loop {
            let mut bytes = [0u8; PRIVATE_KEY_SIZE];
            getrandom::getrandom(&mut bytes).map_err(|e| KeyError::Entropy(e.to_string()))?;
            if let Ok(key) = Self::from_bytes(&bytes) {
                return Ok(key);
            }
        }
    }

    /// Load a secret key from its 32-byte big-endian scalar
    pub fn from_bytes(bytes: &[u8; PRIVATE_KEY_SIZE]) -> Result<Self, KeyError> {
        p256::SecretKey::from_slice(bytes)
            .map(SecretKey)
            .map_err(|_| KeyError::InvalidSecretKey)
    }

    /// Convert secret key to raw bytes
    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        let mut out = [0u8; PRIVATE_KEY_SIZE];
        out.copy_from_slice(&self.0.to_bytes());
        out
    }

    /// Derive the public key from this secret key
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }

    pub(crate) fn inner(&self) -> &p256::SecretKey {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// The long-term keypair of this endpoint
///
/// One per process. It is loaded from (or first written to) the store header
/// and does not change afterwards.
#[derive(Clone, Debug)]
pub struct Identity {
    secret: SecretKey,
    public: PublicKey,
}

impl Identity {
    pub fn generate() -> Result<Self, KeyError> {
        Ok(Self::from_secret(SecretKey::generate()?))
    }

    pub fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public();
        Self { secret, public }
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }
}

/// First eight bytes of a point, hex encoded
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(8)])
}
