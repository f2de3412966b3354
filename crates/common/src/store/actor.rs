//! Single-writer actor in front of the store file.
//!
//! Connection tasks never touch the file. They send commands through a
//! [`MembershipStore`] handle and the actor runs them one at a time, so a
//! lookup-or-append is never interleaved with another append. The actor only
//! awaits file I/O, never the network.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::error::{Result, StorageError};
use super::file::{KeyFile, MembershipRecord};
use crate::crypto::{fingerprint, Identity, PointBytes, SharedSecret};

/// Bound on queued store commands
const COMMAND_BUFFER: usize = 64;

/// Outcome of an admission write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// A new record was appended
    Inserted(SharedSecret),
    /// A record for this peer already existed; its secret is returned unchanged
    Existing(SharedSecret),
}

impl AdmitOutcome {
    pub fn secret(&self) -> &SharedSecret {
        match self {
            AdmitOutcome::Inserted(secret) | AdmitOutcome::Existing(secret) => secret,
        }
    }

}

enum Command {
    Lookup {
        peer: PointBytes,
        reply: oneshot::Sender<Result<Option<SharedSecret>>>,
    },
    Admit {
        peer: PointBytes,
        secret: SharedSecret,
        reply: oneshot::Sender<Result<AdmitOutcome>>,
    },
    Members {
        reply: oneshot::Sender<Result<Vec<MembershipRecord>>>,
    },
}

/// Actor owning the store file
struct StoreActor {
    commands: mpsc::Receiver<Command>,
    file: KeyFile,
}

impl StoreActor {
    async fn run(mut self) {
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                Command::Lookup { peer, reply } => {
                    let res = self.file.lookup_peer(&peer).await;
                    reply.send(res).ok();
                }
                Command::Admit {
                    peer,
                    secret,
                    reply,
                } => {
                    let res = self.admit(peer, secret).await;
                    reply.send(res).ok();
                }
                Command::Members { reply } => {
                    let res = self.file.members().await;
                    reply.send(res).ok();
                }
            }
        }
        tracing::debug!(path = %self.file.path().display(), "store actor stopped");
    }

    async fn admit(&self, peer: PointBytes, secret: SharedSecret) -> Result<AdmitOutcome> {
        if let Some(existing) = self.file.lookup_peer(&peer).await? {
            tracing::debug!(peer = %fingerprint(&peer), "peer already a member, keeping first record");
            return Ok(AdmitOutcome::Existing(existing));
        }
        self.file.append_member(&peer, &secret).await?;
        tracing::info!(
            peer = %fingerprint(&peer),
            secret = %secret.fingerprint(),
            "appended membership record"
        );
        Ok(AdmitOutcome::Inserted(secret))
    }
}

/// Cloneable handle to the identity and membership store
///
/// The actor task stops once every handle has been dropped.
#[derive(Debug, Clone)]
pub struct MembershipStore {
    tx: mpsc::Sender<Command>,
    identity: Arc<Identity>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Lookup { peer, .. } => write!(f, "Lookup({})", fingerprint(peer)),
            Command::Admit { peer, .. } => write!(f, "Admit({})", fingerprint(peer)),
            Command::Members { .. } => f.write_str("Members"),
        }
    }
}

impl MembershipStore {
    /// Load (or create) the store at `path` and spawn its actor
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (file, identity) = KeyFile::load_or_create(path).await?;
        // validate the record region before serving anyone
        let members = file.members().await?;
        tracing::info!(
            path = %file.path().display(),
            members = members.len(),
            "membership store opened"
        );

        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(StoreActor { commands, file }.run());

        Ok(Self {
            tx,
            identity: Arc::new(identity),
        })
    }

    /// The local identity read from the store header
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Find the stored secret for `peer`, if it is a member
    pub async fn lookup(&self, peer: &PointBytes) -> Result<Option<SharedSecret>> {
        self.request(|reply| Command::Lookup { peer: *peer, reply })
            .await
    }

    /// Persist `secret` for `peer` unless a record already exists
    ///
    /// Lookup and append run as one unit inside the actor. When two connections
    /// race to admit the same peer, the first append wins and the second caller
    /// gets [`AdmitOutcome::Existing`] with the stored secret.
    pub async fn admit(&self, peer: &PointBytes, secret: SharedSecret) -> Result<AdmitOutcome> {
        self.request(|reply| Command::Admit {
            peer: *peer,
            secret,
            reply,
        })
        .await
    }

    /// Every stored record in append order
    pub async fn members(&self) -> Result<Vec<MembershipRecord>> {
        self.request(|reply| Command::Members { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| StorageError::ActorClosed)?;
        rx.await.map_err(|_| StorageError::ActorClosed)?
    }
}
