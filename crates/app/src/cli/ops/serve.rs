use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Args;

use pairlink::process::{run_server, ProcessError, ServeMode};
use pairlink::state::{AppState, StateError};

/// Accept peers and send or receive one payload per connection
#[derive(Args, Debug, Clone)]
pub struct Serve {
    /// Send this file to every peer that connects
    #[arg(long, conflicts_with = "inbox", required_unless_present = "inbox")]
    pub payload: Option<PathBuf>,

    /// Receive a payload from every peer into this directory
    #[arg(long)]
    pub inbox: Option<PathBuf>,

    /// Override the configured listen address
    #[arg(long)]
    pub listen_addr: Option<SocketAddr>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),

    #[error("failed to read payload {path}: {source}")]
    Payload {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("payload is {len} bytes, above the configured limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("one of --payload or --inbox is required")]
    NothingToServe,

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl Serve {
    async fn mode(&self, max_payload: usize) -> Result<ServeMode, ServeError> {
        match (&self.payload, &self.inbox) {
            (Some(path), _) => {
                let payload = tokio::fs::read(path)
                    .await
                    .map_err(|source| ServeError::Payload {
                        path: path.clone(),
                        source,
                    })?;
                if payload.len() > max_payload {
                    return Err(ServeError::PayloadTooLarge {
                        len: payload.len(),
                        max: max_payload,
                    });
                }
                Ok(ServeMode::Send(payload))
            }
            (None, Some(dir)) => Ok(ServeMode::Inbox(dir.clone())),
            (None, None) => Err(ServeError::NothingToServe),
        }
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Serve {
    type Error = ServeError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let _guards = ctx.init_logging(&state.config);

        let mode = self.mode(state.config.max_payload_bytes).await?;
        let listen_addr = self.listen_addr.unwrap_or(state.config.listen_addr);
        let handshake = state.handshake().await?;
        tracing::info!(
            identity = %handshake.store().identity().public().fingerprint(),
            admission = ?state.config.admission,
            "store ready"
        );

        run_server(handshake, listen_addr, mode).await?;
        Ok("server stopped".to_string())
    }
}
