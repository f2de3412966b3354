//! TCP accept loop for the accepting role
//!
//! Each connection runs in its own task. A failed handshake closes that
//! connection and is logged; the listener keeps going until the shutdown
//! watch fires, then waits for in-flight connections to finish.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::crypto::PublicKey;
use crate::handshake::{Handshake, Resolution, Transfer, TransferOutcome};

/// A payload received from a peer while serving in receive mode
#[derive(Debug, Clone)]
pub struct Delivery {
    pub remote: SocketAddr,
    pub peer: PublicKey,
    pub resolution: Resolution,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Server {
    handshake: Handshake,
    transfer: Transfer,
    deliveries: Option<flume::Sender<Delivery>>,
}

impl Server {
    /// Serve `payload` to every peer that completes the handshake
    pub fn sending(handshake: Handshake, payload: impl Into<std::sync::Arc<[u8]>>) -> Self {
        Self {
            handshake,
            transfer: Transfer::send(payload),
            deliveries: None,
        }
    }

    /// Receive one payload per connection
    ///
    /// Deliveries are pushed to the returned receiver as they complete. If
    /// the receiver is dropped, payloads are still read and then discarded.
    pub fn receiving(handshake: Handshake) -> (Self, flume::Receiver<Delivery>) {
        let (tx, rx) = flume::unbounded();
        let server = Self {
            handshake,
            transfer: Transfer::Receive,
            deliveries: Some(tx),
        };
        (server, rx)
    }

    /// Accept connections until `shutdown` fires
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<()>,
    ) -> std::io::Result<()> {
        let local = listener.local_addr()?;
        tracing::info!(%local, "listening for peers");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("listener shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("accept failed: {}", e);
                            continue;
                        }
                    };
                    let server = self.clone();
                    let span = tracing::info_span!("connection", %remote);
                    connections.spawn(async move { server.handle(stream, remote).await }.instrument(span));
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        if !connections.is_empty() {
            tracing::info!(in_flight = connections.len(), "waiting for open connections");
        }
        while connections.join_next().await.is_some() {}
        Ok(())
    }

    async fn handle(&self, stream: TcpStream, remote: SocketAddr) {
        tracing::debug!("peer connected");
        let report = match self.handshake.accept(stream, &self.transfer).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("connection aborted: {}", e);
                return;
            }
        };

        match report.transfer {
            TransferOutcome::Sent(len) => {
                tracing::info!(
                    peer = %report.peer.fingerprint(),
                    resolution = %report.resolution,
                    bytes = len,
                    "payload sent"
                );
            }
            TransferOutcome::Received(payload) => {
                tracing::info!(
                    peer = %report.peer.fingerprint(),
                    resolution = %report.resolution,
                    bytes = payload.len(),
                    "payload received"
                );
                let delivery = Delivery {
                    remote,
                    peer: report.peer,
                    resolution: report.resolution,
                    payload,
                };
                if let Some(tx) = &self.deliveries {
                    if tx.send(delivery).is_err() {
                        tracing::debug!("no consumer for received payload, dropping");
                    }
                }
            }
        }
    }
}
