use clap::Args;

use pairlink::state::{AppState, StateError};

/// Print the local public point
#[derive(Args, Debug, Clone)]
pub struct Identity;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Identity {
    type Error = IdentityError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let store = state.open_store().await?;
        let public = store.identity().public();

        Ok(format!(
            "fingerprint: {}\npublic key:  {}",
            public.fingerprint(),
            public.to_hex()
        ))
    }
}
