use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::{fs, path::PathBuf};

use clap::ValueEnum;
use common::admission::{AdmissionOracle, StaticAdmission};
use common::channel::DEFAULT_MAX_PAYLOAD;
use common::handshake::{Handshake, HandshakeConfig};
use common::store::{MembershipStore, StorageError};
use serde::{Deserialize, Serialize};

use crate::console::ConsolePrompt;

pub const APP_NAME: &str = "pairlink";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const KEY_FILE_NAME: &str = "keys.bin";

/// How first-contact peers are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Ask on the console for every new peer
    #[default]
    Prompt,
    /// Admit every new peer
    Accept,
    /// Never admit; new peers run on the fallback secret
    Reject,
}

impl AdmissionPolicy {
    pub fn oracle(&self) -> Arc<dyn AdmissionOracle> {
        match self {
            AdmissionPolicy::Prompt => Arc::new(ConsolePrompt::stdin()),
            AdmissionPolicy::Accept => Arc::new(StaticAdmission::admit_all()),
            AdmissionPolicy::Reject => Arc::new(StaticAdmission::reject_all()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address `serve` listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Address `connect` dials
    #[serde(default = "default_remote_addr")]
    pub remote_addr: SocketAddr,
    #[serde(default)]
    pub admission: AdmissionPolicy,
    /// Bound on each network read or write, unbounded if unset
    #[serde(default)]
    pub io_timeout_secs: Option<u64>,
    /// Bound on an admission decision; expiry rejects the peer
    #[serde(default)]
    pub admission_timeout_secs: Option<u64>,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_remote_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_max_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            remote_addr: default_remote_addr(),
            admission: AdmissionPolicy::default(),
            io_timeout_secs: None,
            admission_timeout_secs: None,
            max_payload_bytes: default_max_payload_bytes(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            io_timeout: self.io_timeout_secs.map(Duration::from_secs),
            admission_timeout: self.admission_timeout_secs.map(Duration::from_secs),
            max_payload: self.max_payload_bytes,
        }
    }

    /// Parsed log level, falling back to INFO on anything unrecognized
    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the pairlink directory (~/.pairlink)
    pub app_dir: PathBuf,
    /// Path to the identity and membership store
    pub key_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the app directory path (custom or default ~/.pairlink)
    pub fn app_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Create the app directory and write its config
    ///
    /// The identity itself is generated the first time the store is opened,
    /// see [`AppState::open_store`].
    pub fn init(custom_path: Option<PathBuf>, config: Option<AppConfig>) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom_path)?;
        if app_dir.join(CONFIG_FILE_NAME).exists() {
            return Err(StateError::AlreadyInitialized);
        }
        fs::create_dir_all(&app_dir)?;

        let config = config.unwrap_or_default();
        let config_path = app_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        Ok(Self {
            key_path: app_dir.join(KEY_FILE_NAME),
            app_dir,
            config_path,
            config,
        })
    }

    /// Load existing state from the app directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom_path)?;
        if !app_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let key_path = app_dir.join(KEY_FILE_NAME);
        let config_path = app_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }
        if !key_path.exists() {
            return Err(StateError::MissingFile(KEY_FILE_NAME.to_string()));
        }

        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;

        Ok(Self {
            app_dir,
            key_path,
            config_path,
            config,
        })
    }

    /// Open the membership store, creating the identity if needed
    pub async fn open_store(&self) -> Result<MembershipStore, StateError> {
        Ok(MembershipStore::open(&self.key_path).await?)
    }

    /// Open the store and wire it to the configured admission policy
    pub async fn handshake(&self) -> Result<Handshake, StateError> {
        let store = self.open_store().await?;
        Ok(Handshake::new(
            store,
            self.config.admission.oracle(),
            self.config.handshake_config(),
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("pairlink directory not initialized. Run 'pairlink init' first")]
    NotInitialized,

    #[error("pairlink directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("membership store: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
