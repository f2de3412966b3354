//! Accept loop tests: concurrency, deliveries and shutdown

mod common;

use ::common::admission::AdmissionDecision;
use ::common::handshake::{Resolution, Transfer, TransferOutcome};
use ::common::server::Server;
use futures::future::join_all;
use tokio::sync::watch;

#[tokio::test]
async fn test_concurrent_first_contacts_store_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let server = common::endpoint(&dir, "server.bin", AdmissionDecision::Admit).await;
    let client = common::endpoint(&dir, "client.bin", AdmissionDecision::Admit).await;
    let (listener, addr) = common::listener().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let serving = Server::sending(server.handshake.clone(), b"shared".to_vec());
    let serve = tokio::spawn(async move { serving.serve(listener, shutdown_rx).await });

    let receive = Transfer::Receive;
    let reports = join_all((0..8).map(|_| client.handshake.connect(addr, &receive))).await;
    for report in reports {
        let report = report.unwrap();
        assert_eq!(report.transfer, TransferOutcome::Received(b"shared".to_vec()));
    }

    shutdown_tx.send(()).unwrap();
    serve.await.unwrap().unwrap();

    assert_eq!(common::stored_records(&server.store_path), 1);
    assert_eq!(common::stored_records(&client.store_path), 1);
}

#[tokio::test]
async fn test_receiving_server_delivers_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let server = common::endpoint(&dir, "server.bin", AdmissionDecision::Admit).await;
    let client = common::endpoint(&dir, "client.bin", AdmissionDecision::Admit).await;
    let (listener, addr) = common::listener().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let (serving, deliveries) = Server::receiving(server.handshake.clone());
    let serve = tokio::spawn(async move { serving.serve(listener, shutdown_rx).await });

    for message in [&b"first"[..], &b"second"[..]] {
        let report = client
            .handshake
            .connect(addr, &Transfer::send(message))
            .await
            .unwrap();
        assert_eq!(report.transfer, TransferOutcome::Sent(message.len()));

        let delivery = deliveries.recv_async().await.unwrap();
        assert_eq!(delivery.payload, message);
        assert_eq!(&delivery.peer, client.store().identity().public());
    }

    shutdown_tx.send(()).unwrap();
    serve.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_connection_does_not_stop_listener() {
    let dir = tempfile::tempdir().unwrap();
    let server = common::endpoint(&dir, "server.bin", AdmissionDecision::Reject).await;
    let client = common::endpoint(&dir, "client.bin", AdmissionDecision::Admit).await;
    let (listener, addr) = common::listener().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let serving = Server::sending(server.handshake.clone(), b"still here".to_vec());
    let serve = tokio::spawn(async move { serving.serve(listener, shutdown_rx).await });

    // connect and hang up immediately
    drop(tokio::net::TcpStream::connect(addr).await.unwrap());

    let report = client.handshake.connect(addr, &Transfer::Receive).await.unwrap();
    assert_eq!(report.resolution, Resolution::Admitted);

    shutdown_tx.send(()).unwrap();
    serve.await.unwrap().unwrap();
}
