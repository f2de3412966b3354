use std::net::SocketAddr;

use clap::Args;

use pairlink::state::{AdmissionPolicy, AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Address `serve` listens on
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// Address `connect` dials
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub remote_addr: SocketAddr,

    /// How first-contact peers are handled
    #[arg(long, value_enum, default_value_t = AdmissionPolicy::Prompt)]
    pub admission: AdmissionPolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            listen_addr: self.listen_addr,
            remote_addr: self.remote_addr,
            admission: self.admission,
            ..Default::default()
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;
        let store = state.open_store().await?;

        Ok(format!(
            "Initialized pairlink directory at: {}\n\
             - Keys: {}\n\
             - Config: {}\n\
             - Identity: {}\n\
             - Listen address: {}\n\
             - Remote address: {}\n\
             - Admission: {:?}",
            state.app_dir.display(),
            state.key_path.display(),
            state.config_path.display(),
            store.identity().public().fingerprint(),
            state.config.listen_addr,
            state.config.remote_addr,
            state.config.admission,
        ))
    }
}
