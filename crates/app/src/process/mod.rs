pub mod utils;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::handshake::Handshake;
use common::server::{Delivery, Server};
use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const LOG_FILE_NAME: &str = "pairlink.log";

/// What the listener does with each connection once the handshake settles
#[derive(Debug, Clone)]
pub enum ServeMode {
    /// Send the same payload to every peer
    Send(Vec<u8>),
    /// Receive one payload per connection and write it into this directory
    Inbox(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("failed to install signal handlers: {0}")]
    Signals(std::io::Error),

    #[error("failed to prepare inbox {path}: {source}")]
    Inbox {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to shut down within {} seconds", FINAL_SHUTDOWN_TIMEOUT.as_secs())]
    ShutdownTimeout,
}

/// Initialize logging, panic handler, and build info reporting.
/// Returns guards that must be kept alive for the duration of the program.
///
/// Logs go to stderr so stdout stays free for command output.
pub fn init_logging(
    log_level: tracing::Level,
    log_dir: Option<&Path>,
) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let mut guards = Vec::new();

    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(stderr_guard);

    let stderr_env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stderr_writer)
        .with_filter(stderr_env_filter);

    match log_dir {
        Some(log_dir) => {
            if let Err(e) = std::fs::create_dir_all(log_dir) {
                eprintln!("Warning: Failed to create log directory {:?}: {}", log_dir, e);
            }

            let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
            let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
            guards.push(file_guard);

            let file_env_filter = EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy();

            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(file_env_filter);

            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => tracing_subscriber::registry().with(stderr_layer).init(),
    }

    utils::register_panic_logger();
    utils::report_build_info();

    guards
}

/// Wait for shutdown and join all handles with timeout.
async fn shutdown_and_join(
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
) -> Result<(), ProcessError> {
    let _ = graceful_waiter.await;

    timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .map(|_| ())
        .map_err(|_| ProcessError::ShutdownTimeout)
}

/// Bind `listen_addr` and serve until SIGINT or SIGTERM
pub async fn run_server(
    handshake: Handshake,
    listen_addr: SocketAddr,
    mode: ServeMode,
) -> Result<(), ProcessError> {
    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|source| ProcessError::Bind {
            addr: listen_addr,
            source,
        })?;
    let (graceful_waiter, _shutdown_tx, shutdown_rx) =
        utils::graceful_shutdown_blocker().map_err(ProcessError::Signals)?;

    let mut handles = Vec::new();

    let server = match mode {
        ServeMode::Send(payload) => {
            tracing::info!(bytes = payload.len(), "serving payload to every peer");
            Server::sending(handshake, payload)
        }
        ServeMode::Inbox(dir) => {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| ProcessError::Inbox {
                    path: dir.clone(),
                    source,
                })?;
            tracing::info!(inbox = %dir.display(), "receiving payloads");
            let (server, deliveries) = Server::receiving(handshake);
            handles.push(tokio::spawn(write_deliveries(deliveries, dir)));
            server
        }
    };

    handles.push(tokio::spawn(async move {
        if let Err(e) = server.serve(listener, shutdown_rx).await {
            tracing::error!("listener error: {}", e);
        }
    }));

    shutdown_and_join(graceful_waiter, handles).await
}

/// Write each delivery into `dir` until every sender is gone
async fn write_deliveries(deliveries: flume::Receiver<Delivery>, dir: PathBuf) {
    let mut seq = 0u64;
    while let Ok(delivery) = deliveries.recv_async().await {
        seq += 1;
        let path = dir.join(delivery_file_name(seq, &delivery));
        match tokio::fs::write(&path, &delivery.payload).await {
            Ok(()) => tracing::info!(
                remote = %delivery.remote,
                path = %path.display(),
                "payload saved"
            ),
            Err(e) => tracing::error!(path = %path.display(), "failed to save payload: {}", e),
        }
    }
}

fn delivery_file_name(seq: u64, delivery: &Delivery) -> String {
    format!(
        "{:04}-{}-{}.bin",
        seq,
        delivery.peer.fingerprint(),
        delivery.resolution
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::crypto::SecretKey;
    use common::handshake::Resolution;

    #[tokio::test]
    async fn test_deliveries_land_in_inbox() {
        let dir = tempfile::tempdir().unwrap();
        let peer = SecretKey::generate().unwrap().public();
        let (tx, rx) = flume::unbounded();

        for payload in [b"one".to_vec(), b"two".to_vec()] {
            tx.send(Delivery {
                remote: "127.0.0.1:9".parse().unwrap(),
                peer,
                resolution: Resolution::Known,
                payload,
            })
            .unwrap();
        }
        drop(tx);

        write_deliveries(rx, dir.path().to_path_buf()).await;

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[0].starts_with("0001-"));
        assert!(names[0].ends_with("-known.bin"));
        assert_eq!(std::fs::read(dir.path().join(&names[1])).unwrap(), b"two");
    }
}
