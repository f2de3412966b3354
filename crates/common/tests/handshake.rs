//! End-to-end handshake tests over real TCP connections

mod common;

use ::common::admission::AdmissionDecision;
use ::common::crypto::{derive_shared_secret, KeyError, PUBLIC_KEY_SIZE};
use ::common::handshake::{HandshakeError, HandshakeState, Resolution, Transfer, TransferOutcome};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const PAYLOAD: &[u8] = b"the quick brown fox jumps over the lazy dog";

#[tokio::test]
async fn test_first_contact_admits_then_remembers() {
    let dir = tempfile::tempdir().unwrap();
    let server = common::endpoint(&dir, "server.bin", AdmissionDecision::Admit).await;
    let client = common::endpoint(&dir, "client.bin", AdmissionDecision::Admit).await;
    let (listener, addr) = common::listener().await;

    for round in 0..2 {
        let accept = async {
            let (stream, _) = listener.accept().await.unwrap();
            server.handshake.accept(stream, &Transfer::send(PAYLOAD)).await
        };
        let receive = Transfer::Receive;
        let initiate = client.handshake.connect(addr, &receive);
        let (served, fetched) = tokio::join!(accept, initiate);
        let served = served.unwrap();
        let fetched = fetched.unwrap();

        let expected = if round == 0 {
            Resolution::Admitted
        } else {
            Resolution::Known
        };
        assert_eq!(served.resolution, expected);
        assert_eq!(fetched.resolution, expected);
        assert_eq!(fetched.transfer, TransferOutcome::Received(PAYLOAD.to_vec()));
    }

    // asked once, on first contact only
    assert_eq!(server.prompts(), 1);
    assert_eq!(client.prompts(), 1);
    assert_eq!(common::stored_records(&server.store_path), 1);
    assert_eq!(common::stored_records(&client.store_path), 1);
}

#[tokio::test]
async fn test_both_sides_store_the_same_secret() {
    let dir = tempfile::tempdir().unwrap();
    let server = common::endpoint(&dir, "server.bin", AdmissionDecision::Admit).await;
    let client = common::endpoint(&dir, "client.bin", AdmissionDecision::Admit).await;
    let (listener, addr) = common::listener().await;

    let accept = async {
        let (stream, _) = listener.accept().await.unwrap();
        server.handshake.accept(stream, &Transfer::Receive).await
    };
    let transfer = Transfer::send(PAYLOAD);
    let initiate = client.handshake.connect(addr, &transfer);
    let (served, fetched) = tokio::join!(accept, initiate);
    assert_eq!(served.unwrap().transfer, TransferOutcome::Received(PAYLOAD.to_vec()));
    assert_eq!(fetched.unwrap().transfer, TransferOutcome::Sent(PAYLOAD.len()));

    let server_public = server.store().identity().public().to_bytes();
    let client_public = client.store().identity().public().to_bytes();
    let on_server = server.store().lookup(&client_public).await.unwrap().unwrap();
    let on_client = client.store().lookup(&server_public).await.unwrap().unwrap();
    assert_eq!(on_server, on_client);

    let derived = derive_shared_secret(client.store().identity().secret(), &server_public).unwrap();
    assert_eq!(on_client, derived);
}

#[tokio::test]
async fn test_rejected_peer_still_transfers_without_record() {
    let dir = tempfile::tempdir().unwrap();
    let server = common::endpoint(&dir, "server.bin", AdmissionDecision::Reject).await;
    let client = common::endpoint(&dir, "client.bin", AdmissionDecision::Reject).await;
    let (listener, addr) = common::listener().await;

    let accept = async {
        let (stream, _) = listener.accept().await.unwrap();
        server.handshake.accept(stream, &Transfer::send(PAYLOAD)).await
    };
    let receive = Transfer::Receive;
    let initiate = client.handshake.connect(addr, &receive);
    let (served, fetched) = tokio::join!(accept, initiate);
    let served = served.unwrap();
    let fetched = fetched.unwrap();

    assert_eq!(served.resolution, Resolution::Rejected);
    assert_eq!(fetched.resolution, Resolution::Rejected);
    // each side keys with its own private scalar, so only the length survives
    match fetched.transfer {
        TransferOutcome::Received(payload) => assert_eq!(payload.len(), PAYLOAD.len()),
        other => panic!("expected a received payload, got {:?}", other),
    }

    assert_eq!(common::stored_records(&server.store_path), 0);
    assert_eq!(common::stored_records(&client.store_path), 0);
}

#[tokio::test]
async fn test_short_identity_aborts_before_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let server = common::endpoint(&dir, "server.bin", AdmissionDecision::Admit).await;
    let (listener, addr) = common::listener().await;

    let accept = async {
        let (stream, _) = listener.accept().await.unwrap();
        server.handshake.accept(stream, &Transfer::send(PAYLOAD)).await
    };
    let peer = async {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&[7u8; 40]).await.unwrap();
        stream.shutdown().await.unwrap();
    };
    let (served, _) = tokio::join!(accept, peer);

    let err = served.unwrap_err();
    assert!(matches!(
        err,
        HandshakeError::Transmission {
            state: HandshakeState::AwaitPeerIdentity,
            ..
        }
    ));
    assert_eq!(server.prompts(), 0);
    assert_eq!(common::stored_records(&server.store_path), 0);
}

#[tokio::test]
async fn test_off_curve_identity_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let server = common::endpoint(&dir, "server.bin", AdmissionDecision::Admit).await;
    let (listener, addr) = common::listener().await;

    let accept = async {
        let (stream, _) = listener.accept().await.unwrap();
        server.handshake.accept(stream, &Transfer::send(PAYLOAD)).await
    };
    let peer = async {
        let mut point = [0u8; PUBLIC_KEY_SIZE];
        point[31] = 1;
        point[63] = 1;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&point).await.unwrap();
        stream
    };
    let (served, _stream) = tokio::join!(accept, peer);

    assert!(matches!(
        served.unwrap_err(),
        HandshakeError::InvalidPeerKey(KeyError::InvalidPeerKey)
    ));
    assert_eq!(server.prompts(), 0);
}

#[tokio::test]
async fn test_admission_timeout_rejects() {
    use ::common::handshake::HandshakeConfig;
    use std::time::Duration;

    let dir = tempfile::tempdir().unwrap();
    let store = ::common::store::MembershipStore::open(dir.path().join("server.bin"))
        .await
        .unwrap();
    let server = ::common::handshake::Handshake::new(
        store,
        std::sync::Arc::new(Stall),
        HandshakeConfig {
            admission_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        },
    );
    let client = common::endpoint(&dir, "client.bin", AdmissionDecision::Admit).await;
    let (listener, addr) = common::listener().await;

    let accept = async {
        let (stream, _) = listener.accept().await.unwrap();
        server.accept(stream, &Transfer::Receive).await
    };
    let transfer = Transfer::send(PAYLOAD);
    let initiate = client.handshake.connect(addr, &transfer);
    let (served, fetched) = tokio::join!(accept, initiate);

    assert_eq!(served.unwrap().resolution, Resolution::Rejected);
    assert_eq!(fetched.unwrap().resolution, Resolution::Admitted);
    assert_eq!(common::stored_records(&dir.path().join("server.bin")), 0);
}

/// Oracle that never answers
#[derive(Debug)]
struct Stall;

#[async_trait::async_trait]
impl ::common::admission::AdmissionOracle for Stall {
    async fn decide(&self, _peer: &::common::crypto::PublicKey) -> AdmissionDecision {
        std::future::pending().await
    }
}
