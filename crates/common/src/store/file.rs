//! On-disk layout of the identity and membership store
//!
//! ```text
//! +-------------+-------------+----------------------------------------+
//! | private (32)| public (64) | record 0 | record 1 | ... | record n-1 |
//! +-------------+-------------+----------------------------------------+
//! record = peer public point (64) || shared secret (64)
//! ```
//!
//! The header is written once. Records are only ever appended, each in a
//! single write. A record region whose length is not a multiple of
//! [`RECORD_SIZE`] means an append was torn and is reported as corruption.

use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::{Result, StorageError};
use crate::crypto::{
    Identity, PointBytes, SecretKey, SharedSecret, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE,
    SHARED_SECRET_SIZE,
};

/// Size of the identity header in bytes
pub const HEADER_SIZE: usize = PRIVATE_KEY_SIZE + PUBLIC_KEY_SIZE;
/// Size of one membership record in bytes
pub const RECORD_SIZE: usize = PUBLIC_KEY_SIZE + SHARED_SECRET_SIZE;

/// A peer admitted to the group and the secret derived for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRecord {
    pub peer: PointBytes,
    pub secret: SharedSecret,
}

impl MembershipRecord {
    fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..PUBLIC_KEY_SIZE].copy_from_slice(&self.peer);
        out[PUBLIC_KEY_SIZE..].copy_from_slice(self.secret.as_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut peer = [0u8; PUBLIC_KEY_SIZE];
        peer.copy_from_slice(&bytes[..PUBLIC_KEY_SIZE]);
        let mut secret = [0u8; SHARED_SECRET_SIZE];
        secret.copy_from_slice(&bytes[PUBLIC_KEY_SIZE..RECORD_SIZE]);
        Self {
            peer,
            secret: SharedSecret::from_bytes(secret),
        }
    }
}

/// Handle on the store file
///
/// Carries no open file descriptor; every operation opens the file anew.
/// Callers are responsible for serializing writers, see [`super::MembershipStore`].
#[derive(Debug, Clone)]
pub struct KeyFile {
    path: PathBuf,
}

impl KeyFile {
    /// Read the identity header, writing a fresh one first if no file exists
    ///
    /// # Errors
    ///
    /// - [`StorageError::Truncated`] if the file is shorter than the header
    /// - [`StorageError::Corrupt`] if the record region is torn
    /// - [`StorageError::InvalidIdentity`] if the stored keypair is inconsistent
    /// - [`StorageError::Generation`] if a new keypair could not be generated
    pub async fn load_or_create(path: impl AsRef<Path>) -> Result<(Self, Identity)> {
        let file = Self {
            path: path.as_ref().to_path_buf(),
        };

        if fs::try_exists(&file.path).await? {
            let identity = file.load_identity().await?;
            tracing::debug!(
                path = %file.path.display(),
                identity = %identity.public().fingerprint(),
                "loaded identity"
            );
            return Ok((file, identity));
        }

        let identity = Identity::generate()?;
        file.write_header(&identity).await?;
        tracing::info!(
            path = %file.path.display(),
            identity = %identity.public().fingerprint(),
            "initialized new identity"
        );
        Ok((file, identity))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_header(&self, identity: &Identity) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE];
        header[..PRIVATE_KEY_SIZE].copy_from_slice(&identity.secret().to_bytes());
        header[PRIVATE_KEY_SIZE..].copy_from_slice(&identity.public().to_bytes());

        let mut out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await?;
        out.write_all(&header).await?;
        out.sync_all().await?;
        Ok(())
    }

    async fn load_identity(&self) -> Result<Identity> {
        let bytes = self.read_checked().await?;

        let mut secret = [0u8; PRIVATE_KEY_SIZE];
        secret.copy_from_slice(&bytes[..PRIVATE_KEY_SIZE]);
        let secret =
            SecretKey::from_bytes(&secret).map_err(|e| StorageError::InvalidIdentity(e.to_string()))?;

        let identity = Identity::from_secret(secret);
        if identity.public().to_bytes()[..] != bytes[PRIVATE_KEY_SIZE..HEADER_SIZE] {
            return Err(StorageError::InvalidIdentity(
                "stored public point does not match private scalar".to_string(),
            ));
        }
        Ok(identity)
    }

    /// Read the whole file and validate its shape
    async fn read_checked(&self) -> Result<Vec<u8>> {
        let bytes = fs::read(&self.path).await?;
        let len = bytes.len() as u64;
        if bytes.len() < HEADER_SIZE {
            return Err(StorageError::Truncated { len });
        }
        if (bytes.len() - HEADER_SIZE) % RECORD_SIZE != 0 {
            return Err(StorageError::Corrupt {
                len: len - HEADER_SIZE as u64,
            });
        }
        Ok(bytes)
    }

    /// All membership records in append order
    pub async fn members(&self) -> Result<Vec<MembershipRecord>> {
        let bytes = self.read_checked().await?;
        Ok(bytes[HEADER_SIZE..]
            .chunks_exact(RECORD_SIZE)
            .map(MembershipRecord::from_bytes)
            .collect())
    }

    /// Scan records in order and return the secret of the first matching peer
    pub async fn lookup_peer(&self, peer: &PointBytes) -> Result<Option<SharedSecret>> {
        let bytes = self.read_checked().await?;
        Ok(bytes[HEADER_SIZE..]
            .chunks_exact(RECORD_SIZE)
            .find(|record| record[..PUBLIC_KEY_SIZE] == peer[..])
            .map(|record| MembershipRecord::from_bytes(record).secret))
    }

    /// Append one record in a single write
    ///
    /// Does not check for an existing record for `peer`. On a failed write the
    /// file is cut back to its previous length so no partial record remains.
    pub async fn append_member(&self, peer: &PointBytes, secret: &SharedSecret) -> Result<()> {
        let record = MembershipRecord {
            peer: *peer,
            secret: secret.clone(),
        };

        let mut out = OpenOptions::new().append(true).open(&self.path).await?;
        let len = out.metadata().await?.len();

        let written = async {
            out.write_all(&record.to_bytes()).await?;
            out.sync_data().await
        }
        .await;

        if let Err(e) = written {
            tracing::error!(path = %self.path.display(), "append failed, rolling back: {}", e);
            if let Err(rollback) = out.set_len(len).await {
                tracing::error!("rollback of torn record failed: {}", rollback);
            }
            return Err(e.into());
        }
        Ok(())
    }
}
