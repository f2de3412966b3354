//! Cryptographic primitives for pairlink
//!
//! This module provides the cryptographic foundation of a pairwise channel:
//!
//! - **Identity**: one long-term P-256 keypair per endpoint
//! - **Key agreement**: static ECDH between the local scalar and a peer point,
//!   kept as the full `X || Y` result point
//! - **Encryption**: AES-128 in ECB mode with always-on zero padding, keyed by
//!   the first 16 bytes of the resolved secret
//!
//! # Security Model
//!
//! There is none to speak of beyond "this public key has been seen before".
//! No forward secrecy, no integrity protection and no defence against a
//! substituted first-contact key. The cipher layout is fixed for wire
//! compatibility, not chosen for strength.

mod agreement;
mod cipher;
mod keys;

pub use agreement::{derive_shared_secret, SharedSecret, SHARED_SECRET_SIZE};
pub use cipher::{padded_len, padding_len, CipherError, SessionCipher, BLOCK_SIZE, SESSION_KEY_SIZE};
pub use keys::{
    fingerprint, Identity, KeyError, PointBytes, PublicKey, SecretKey, PRIVATE_KEY_SIZE,
    PUBLIC_KEY_SIZE,
};
