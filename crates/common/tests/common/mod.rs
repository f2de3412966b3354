//! Shared helpers for handshake integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::admission::{AdmissionDecision, FnAdmission};
use common::handshake::{Handshake, HandshakeConfig};
use common::store::{MembershipStore, HEADER_SIZE, RECORD_SIZE};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// One side of a connection: its store, handshake and how often it was asked to admit
pub struct Endpoint {
    pub handshake: Handshake,
    pub store_path: PathBuf,
    prompts: Arc<AtomicUsize>,
}

impl Endpoint {
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &MembershipStore {
        self.handshake.store()
    }
}

/// Open a fresh store under `dir` whose oracle always answers `decision`
pub async fn endpoint(dir: &TempDir, name: &str, decision: AdmissionDecision) -> Endpoint {
    endpoint_with(dir, name, decision, HandshakeConfig::default()).await
}

pub async fn endpoint_with(
    dir: &TempDir,
    name: &str,
    decision: AdmissionDecision,
    config: HandshakeConfig,
) -> Endpoint {
    let store_path = dir.path().join(name);
    let store = MembershipStore::open(&store_path).await.unwrap();

    let prompts = Arc::new(AtomicUsize::new(0));
    let counter = prompts.clone();
    let oracle = FnAdmission::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        decision
    });

    Endpoint {
        handshake: Handshake::new(store, Arc::new(oracle), config),
        store_path,
        prompts,
    }
}

/// Bind a listener on an ephemeral localhost port
pub async fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Number of membership records in the file at `path`, checked against the layout
pub fn stored_records(path: &Path) -> usize {
    let len = std::fs::metadata(path).unwrap().len() as usize;
    assert!(len >= HEADER_SIZE);
    assert_eq!((len - HEADER_SIZE) % RECORD_SIZE, 0);
    (len - HEADER_SIZE) / RECORD_SIZE
}
