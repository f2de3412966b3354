use clap::Args;

use common::crypto::fingerprint;
use pairlink::state::{AppState, StateError};

/// List admitted peers
#[derive(Args, Debug, Clone)]
pub struct Members {
    /// Print full public points instead of fingerprints
    #[arg(long)]
    pub full: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum MembersError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),

    #[error("membership store: {0}")]
    Storage(#[from] common::store::StorageError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Members {
    type Error = MembersError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let store = state.open_store().await?;
        let members = store.members().await?;

        if members.is_empty() {
            return Ok("no members".to_string());
        }

        let lines: Vec<String> = members
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let peer = if self.full {
                    hex::encode(record.peer)
                } else {
                    fingerprint(&record.peer)
                };
                format!("{:>3}  {}  secret {}", i + 1, peer, record.secret.fingerprint())
            })
            .collect();

        Ok(lines.join("\n"))
    }
}
