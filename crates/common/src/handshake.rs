//! Per-connection handshake and transfer
//!
//! ## Accepting role
//!
//! ```text
//! AWAIT_PEER_IDENTITY -> RESOLVE_MEMBERSHIP -> [AWAIT_ADMISSION_DECISION]
//!   -> SEND_LOCAL_IDENTITY -> AWAIT_ACK -> TRANSFER -> CLOSED
//! ```
//!
//! ## Initiating role
//!
//! ```text
//! SEND_LOCAL_IDENTITY -> AWAIT_PEER_IDENTITY -> SEND_ACK -> RESOLVE_MEMBERSHIP
//!   -> [AWAIT_ADMISSION_DECISION] -> TRANSFER -> CLOSED
//! ```
//!
//! Every exit, successful or not, passes through CLOSED: the stream is shut
//! down before the result is returned. Membership resolution goes through the
//! store actor and is finished before any further network I/O starts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::admission::{AdmissionDecision, AdmissionOracle};
use crate::channel::{self, read_full, FrameLimits, FramingError, ACK, ACK_SIZE, DEFAULT_MAX_PAYLOAD};
use crate::crypto::{derive_shared_secret, KeyError, PointBytes, PublicKey, SessionCipher, PUBLIC_KEY_SIZE};
use crate::deadline::within;
use crate::store::{AdmitOutcome, MembershipStore, StorageError};

/// Stages of the handshake, used for logging and timeout reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connect,
    AwaitPeerIdentity,
    ResolveMembership,
    AwaitAdmissionDecision,
    SendLocalIdentity,
    AwaitAck,
    SendAck,
    Transfer,
    Closed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Connect => "CONNECT",
            HandshakeState::AwaitPeerIdentity => "AWAIT_PEER_IDENTITY",
            HandshakeState::ResolveMembership => "RESOLVE_MEMBERSHIP",
            HandshakeState::AwaitAdmissionDecision => "AWAIT_ADMISSION_DECISION",
            HandshakeState::SendLocalIdentity => "SEND_LOCAL_IDENTITY",
            HandshakeState::AwaitAck => "AWAIT_ACK",
            HandshakeState::SendAck => "SEND_ACK",
            HandshakeState::Transfer => "TRANSFER",
            HandshakeState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Errors that end a single connection
///
/// None of these are fatal to the process; the connection is closed and
/// the peer has to reconnect.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// A fixed-size exchange came up short or the stream failed
    #[error("transmission error in {state}: {reason}")]
    Transmission {
        state: HandshakeState,
        reason: String,
    },

    #[error(transparent)]
    InvalidPeerKey(#[from] KeyError),

    #[error("membership store: {0}")]
    Storage(#[from] StorageError),

    #[error("transfer framing: {0}")]
    Framing(#[from] FramingError),

    #[error("timed out in {stage}")]
    Timeout { stage: HandshakeState },
}

impl HandshakeError {
    fn transmission(state: HandshakeState, reason: impl fmt::Display) -> Self {
        HandshakeError::Transmission {
            state,
            reason: reason.to_string(),
        }
    }
}

/// Tunables for one endpoint
#[derive(Debug, Clone, Copy)]
pub struct HandshakeConfig {
    /// Bound on each network read or write call; none by default
    pub io_timeout: Option<Duration>,
    /// Bound on the admission decision; on expiry the peer is rejected
    pub admission_timeout: Option<Duration>,
    /// Largest payload accepted when receiving
    pub max_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            io_timeout: None,
            admission_timeout: None,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl HandshakeConfig {
    fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_payload: self.max_payload,
            io_timeout: self.io_timeout,
        }
    }
}

/// Which way the payload flows once the secret is resolved
#[derive(Debug, Clone)]
pub enum Transfer {
    Send(Arc<[u8]>),
    Receive,
}

impl Transfer {
    pub fn send(payload: impl Into<Arc<[u8]>>) -> Self {
        Transfer::Send(payload.into())
    }
}

/// How the session secret was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Peer was already a member; stored secret used
    Known,
    /// Peer was admitted now; secret derived and persisted
    Admitted,
    /// Peer was rejected; fallback secret used, nothing persisted
    Rejected,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Known => f.write_str("known"),
            Resolution::Admitted => f.write_str("admitted"),
            Resolution::Rejected => f.write_str("rejected"),
        }
    }
}

/// What moved over the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Sent(usize),
    Received(Vec<u8>),
}

/// Summary of a completed connection
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub peer: PublicKey,
    pub resolution: Resolution,
    pub transfer: TransferOutcome,
}

/// Runs the handshake for either role against a shared store
#[derive(Debug, Clone)]
pub struct Handshake {
    store: MembershipStore,
    admission: Arc<dyn AdmissionOracle>,
    config: HandshakeConfig,
}

impl Handshake {
    pub fn new(
        store: MembershipStore,
        admission: Arc<dyn AdmissionOracle>,
        config: HandshakeConfig,
    ) -> Self {
        Self {
            store,
            admission,
            config,
        }
    }

    pub fn store(&self) -> &MembershipStore {
        &self.store
    }

    /// Run the accepting role on an already accepted stream
    pub async fn accept<S>(&self, stream: S, transfer: &Transfer) -> Result<SessionReport, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufReader::new(stream);
        let result = self.run_accepting(&mut stream, transfer).await;
        self.close(&mut stream).await;
        result
    }

    /// Run the initiating role on an already connected stream
    pub async fn initiate<S>(&self, stream: S, transfer: &Transfer) -> Result<SessionReport, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufReader::new(stream);
        let result = self.run_initiating(&mut stream, transfer).await;
        self.close(&mut stream).await;
        result
    }

    /// Open a TCP connection to `addr` and run the initiating role on it
    pub async fn connect(
        &self,
        addr: impl ToSocketAddrs,
        transfer: &Transfer,
    ) -> Result<SessionReport, HandshakeError> {
        let stream = within(self.config.io_timeout, TcpStream::connect(addr))
            .await
            .ok_or(HandshakeError::Timeout {
                stage: HandshakeState::Connect,
            })?
            .map_err(|e| HandshakeError::transmission(HandshakeState::Connect, e))?;
        tracing::debug!(remote = ?stream.peer_addr().ok(), "connected");
        self.initiate(stream, transfer).await
    }

    async fn run_accepting<S>(
        &self,
        stream: &mut BufReader<S>,
        transfer: &Transfer,
    ) -> Result<SessionReport, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer = self.read_peer_identity(stream).await?;
        let (cipher, resolution) = self.resolve(&peer).await?;
        self.send_local_identity(stream).await?;
        self.await_ack(stream).await?;
        let transfer = self.transfer(stream, &cipher, transfer).await?;

        Ok(SessionReport {
            peer,
            resolution,
            transfer,
        })
    }

    async fn run_initiating<S>(
        &self,
        stream: &mut BufReader<S>,
        transfer: &Transfer,
    ) -> Result<SessionReport, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.send_local_identity(stream).await?;
        let peer = self.read_peer_identity(stream).await?;
        self.send_ack(stream).await?;
        let (cipher, resolution) = self.resolve(&peer).await?;
        let transfer = self.transfer(stream, &cipher, transfer).await?;

        Ok(SessionReport {
            peer,
            resolution,
            transfer,
        })
    }

    async fn read_peer_identity<S>(&self, stream: &mut BufReader<S>) -> Result<PublicKey, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let state = HandshakeState::AwaitPeerIdentity;
        tracing::trace!(%state);

        let mut bytes: PointBytes = [0u8; PUBLIC_KEY_SIZE];
        let received = read_full(stream, &mut bytes, self.config.io_timeout)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::TimedOut => HandshakeError::Timeout { stage: state },
                _ => HandshakeError::transmission(state, e),
            })?;
        if received != PUBLIC_KEY_SIZE {
            return Err(HandshakeError::transmission(
                state,
                format!("received {} of {} identity bytes", received, PUBLIC_KEY_SIZE),
            ));
        }

        let peer = PublicKey::from_bytes(&bytes)?;
        tracing::debug!(peer = %peer.fingerprint(), "peer identity received");
        Ok(peer)
    }

    async fn send_local_identity<S>(&self, stream: &mut BufReader<S>) -> Result<(), HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let state = HandshakeState::SendLocalIdentity;
        tracing::trace!(%state);

        let public = self.store.identity().public().to_bytes();
        self.write(state, stream, &public).await
    }

    async fn await_ack<S>(&self, stream: &mut BufReader<S>) -> Result<(), HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let state = HandshakeState::AwaitAck;
        tracing::trace!(%state);

        let mut ack = [0u8; ACK_SIZE];
        self.io(state, stream.read_exact(&mut ack))
            .await?
            .map_err(|e| HandshakeError::transmission(state, e))?;
        Ok(())
    }

    async fn send_ack<S>(&self, stream: &mut BufReader<S>) -> Result<(), HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let state = HandshakeState::SendAck;
        tracing::trace!(%state);
        self.write(state, stream, &ACK).await
    }

    /// Map a peer to a session cipher: stored secret, fresh admission, or fallback
    async fn resolve(&self, peer: &PublicKey) -> Result<(SessionCipher, Resolution), HandshakeError> {
        tracing::trace!(state = %HandshakeState::ResolveMembership);
        let peer_bytes = peer.to_bytes();

        if let Some(secret) = self.store.lookup(&peer_bytes).await? {
            tracing::debug!(peer = %peer.fingerprint(), "peer is a known member");
            return Ok((SessionCipher::from_shared(&secret), Resolution::Known));
        }

        tracing::trace!(state = %HandshakeState::AwaitAdmissionDecision);
        let decision = match within(self.config.admission_timeout, self.admission.decide(peer)).await {
            Some(decision) => decision,
            None => {
                tracing::warn!(peer = %peer.fingerprint(), "admission decision timed out, rejecting");
                AdmissionDecision::Reject
            }
        };

        match decision {
            AdmissionDecision::Admit => {
                let identity = self.store.identity();
                let secret = derive_shared_secret(identity.secret(), &peer_bytes)?;
                let outcome = self.store.admit(&peer_bytes, secret).await?;
                if let AdmitOutcome::Existing(_) = outcome {
                    tracing::debug!(peer = %peer.fingerprint(), "admitted concurrently elsewhere");
                }
                tracing::info!(peer = %peer.fingerprint(), "peer admitted to group");
                Ok((SessionCipher::from_shared(outcome.secret()), Resolution::Admitted))
            }
            AdmissionDecision::Reject => {
                // another connection from this peer may have been admitted while we waited
                if let Some(secret) = self.store.lookup(&peer_bytes).await? {
                    tracing::info!(
                        peer = %peer.fingerprint(),
                        "peer rejected here but admitted concurrently, using stored secret"
                    );
                    return Ok((SessionCipher::from_shared(&secret), Resolution::Known));
                }
                tracing::warn!(
                    peer = %peer.fingerprint(),
                    "peer rejected, continuing on fallback secret"
                );
                let identity = self.store.identity();
                Ok((SessionCipher::from_fallback(identity.secret()), Resolution::Rejected))
            }
        }
    }

    async fn transfer<S>(
        &self,
        stream: &mut BufReader<S>,
        cipher: &SessionCipher,
        transfer: &Transfer,
    ) -> Result<TransferOutcome, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::trace!(state = %HandshakeState::Transfer);
        let limits = self.config.frame_limits();
        match transfer {
            Transfer::Send(payload) => {
                channel::send_payload(stream, cipher, payload, &limits).await?;
                Ok(TransferOutcome::Sent(payload.len()))
            }
            Transfer::Receive => {
                let payload = channel::receive_payload(stream, cipher, &limits).await?;
                Ok(TransferOutcome::Received(payload))
            }
        }
    }

    async fn write<S>(
        &self,
        state: HandshakeState,
        stream: &mut BufReader<S>,
        bytes: &[u8],
    ) -> Result<(), HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.io(state, async {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .await?
        .map_err(|e| HandshakeError::transmission(state, e))
    }

    async fn io<F: std::future::Future>(
        &self,
        stage: HandshakeState,
        fut: F,
    ) -> Result<F::Output, HandshakeError> {
        within(self.config.io_timeout, fut)
            .await
            .ok_or(HandshakeError::Timeout { stage })
    }

    async fn close<S>(&self, stream: &mut BufReader<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::trace!(state = %HandshakeState::Closed);
        match within(self.config.io_timeout, stream.shutdown()).await {
            Some(Ok(())) => {}
            Some(Err(e)) => tracing::trace!("shutdown after handshake: {}", e),
            None => tracing::trace!("shutdown after handshake timed out"),
        }
    }
}
