//! Block encryption for payload transfer
//!
//! AES-128 in ECB mode with zero padding. Every block is encrypted on its own,
//! there is no IV and no authentication tag. Padding is always applied: a
//! message that is already block-aligned still gains a full block of zeros.
//! Because zero padding cannot be told apart from trailing zero bytes of the
//! plaintext, the receiver strips padding using the separately transmitted
//! plaintext length only.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Block};

use super::agreement::SharedSecret;
use super::keys::SecretKey;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;
/// AES-128 key size in bytes
pub const SESSION_KEY_SIZE: usize = 16;

/// Errors that can occur while decrypting a padded ciphertext
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("ciphertext length {0} is not a positive multiple of {BLOCK_SIZE}")]
    InvalidLength(usize),
    #[error("plaintext length {plaintext} does not fit ciphertext of {ciphertext} bytes")]
    LengthMismatch { plaintext: usize, ciphertext: usize },
}

/// Number of zero bytes appended to a plaintext of `len` bytes
///
/// Always in `1..=BLOCK_SIZE`.
pub fn padding_len(len: usize) -> usize {
    BLOCK_SIZE - (len % BLOCK_SIZE)
}

/// Ciphertext size for a plaintext of `len` bytes
pub fn padded_len(len: usize) -> usize {
    len + padding_len(len)
}

/// Session cipher keyed by the first 16 bytes of the resolved secret
#[derive(Clone)]
pub struct SessionCipher {
    cipher: Aes128,
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionCipher(..)")
    }
}

impl SessionCipher {
    pub fn new(key: &[u8; SESSION_KEY_SIZE]) -> Self {
        Self {
            cipher: Aes128::new(&GenericArray::from(*key)),
        }
    }

    pub fn from_shared(secret: &SharedSecret) -> Self {
        let mut key = [0u8; SESSION_KEY_SIZE];
        key.copy_from_slice(&secret.as_bytes()[..SESSION_KEY_SIZE]);
        Self::new(&key)
    }

    /// Cipher used on the reject path, keyed from the local private scalar
    ///
    /// This provides no confidentiality against anyone who knows the rule and
    /// the peer can not derive it. It exists for wire compatibility only.
    pub fn from_fallback(local: &SecretKey) -> Self {
        let mut key = [0u8; SESSION_KEY_SIZE];
        key.copy_from_slice(&local.to_bytes()[..SESSION_KEY_SIZE]);
        Self::new(&key)
    }

    /// Zero-pad and encrypt `plaintext` block by block
    pub fn encrypt_padded(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(padded_len(plaintext.len()));
        buf.extend_from_slice(plaintext);
        buf.resize(padded_len(plaintext.len()), 0);

        for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
            let mut block = Block::default();
            block.copy_from_slice(chunk);
            self.cipher.encrypt_block(&mut block);
            chunk.copy_from_slice(&block);
        }
        buf
    }

    /// Decrypt block by block and keep the first `plaintext_len` bytes
    pub fn decrypt_padded(
        &self,
        ciphertext: &[u8],
        plaintext_len: usize,
    ) -> Result<Vec<u8>, CipherError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::InvalidLength(ciphertext.len()));
        }
        if padded_len(plaintext_len) != ciphertext.len() {
            return Err(CipherError::LengthMismatch {
                plaintext: plaintext_len,
                ciphertext: ciphertext.len(),
            });
        }

        let mut buf = ciphertext.to_vec();
        for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
            let mut block = Block::default();
            block.copy_from_slice(chunk);
            self.cipher.decrypt_block(&mut block);
            chunk.copy_from_slice(&block);
        }
        buf.truncate(plaintext_len);
        Ok(buf)
    }
}
