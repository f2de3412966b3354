use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Args;
use tracing::Instrument;

use common::handshake::{HandshakeError, SessionReport, Transfer, TransferOutcome};
use pairlink::state::{AppState, StateError};

/// Connect to a peer and run one exchange as the initiator
///
/// Receives by default; `--send` or `--message` sends instead.
#[derive(Args, Debug, Clone)]
pub struct Connect {
    /// Override the configured remote address
    #[arg(long)]
    pub remote_addr: Option<SocketAddr>,

    /// Send this file
    #[arg(long, conflicts_with_all = ["message", "output"])]
    pub send: Option<PathBuf>,

    /// Send this text
    #[arg(long, conflicts_with = "output")]
    pub message: Option<String>,

    /// Write the received payload here instead of printing it
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
}

impl Connect {
    async fn transfer(&self) -> Result<Transfer, ConnectError> {
        if let Some(path) = &self.send {
            let payload = tokio::fs::read(path).await.map_err(|source| ConnectError::Read {
                path: path.clone(),
                source,
            })?;
            return Ok(Transfer::send(payload));
        }
        if let Some(message) = &self.message {
            return Ok(Transfer::send(message.as_bytes()));
        }
        Ok(Transfer::Receive)
    }

    async fn render(&self, report: SessionReport) -> Result<String, ConnectError> {
        let peer = report.peer.fingerprint();
        match report.transfer {
            TransferOutcome::Sent(len) => Ok(format!(
                "sent {} bytes to {} ({})",
                len, peer, report.resolution
            )),
            TransferOutcome::Received(payload) => match &self.output {
                Some(path) => {
                    tokio::fs::write(path, &payload)
                        .await
                        .map_err(|source| ConnectError::Write {
                            path: path.clone(),
                            source,
                        })?;
                    Ok(format!(
                        "received {} bytes from {} ({}) into {}",
                        payload.len(),
                        peer,
                        report.resolution,
                        path.display()
                    ))
                }
                None => Ok(String::from_utf8_lossy(&payload).into_owned()),
            },
        }
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Connect {
    type Error = ConnectError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let _guards = ctx.init_logging(&state.config);

        let transfer = self.transfer().await?;
        let remote_addr = self.remote_addr.unwrap_or(state.config.remote_addr);
        let handshake = state.handshake().await?;

        let report = handshake
            .connect(remote_addr, &transfer)
            .instrument(tracing::info_span!("connection", remote = %remote_addr))
            .await?;
        tracing::info!(
            peer = %report.peer.fingerprint(),
            resolution = %report.resolution,
            "exchange complete"
        );
        self.render(report).await
    }
}
