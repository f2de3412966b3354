//! Error types for the identity and membership store.

use crate::crypto::KeyError;

/// Errors that can occur when working with the store file.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File is shorter than the identity header
    #[error("store truncated: {len} bytes is shorter than the identity header")]
    Truncated { len: u64 },

    /// Record region is not a whole number of records
    #[error("store corrupt: {len} bytes of records is not a multiple of the record size")]
    Corrupt { len: u64 },

    /// Header holds an unusable keypair
    #[error("invalid identity header: {0}")]
    InvalidIdentity(String),

    /// Keypair generation failed
    #[error("identity generation failed: {0}")]
    Generation(#[from] KeyError),

    /// The store actor has shut down
    #[error("store actor is no longer running")]
    ActorClosed,
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StorageError>;
