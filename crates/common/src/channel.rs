//! Framed cipher channel for a single payload transfer
//!
//! ## Wire Format
//!
//! ```text
//! sender                                   receiver
//!   | -- ASCII decimal L, '\n' -------------> |
//!   | <------------------------ ack (8 bytes) |
//!   | -- ciphertext (L + pad bytes), '\n' --> |
//! ```
//!
//! `pad = 16 - (L mod 16)`, so a block-aligned payload still carries a full
//! block of zero padding. The ciphertext is read by length; the trailing
//! newline is a terminator, never a delimiter to scan for.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::{padded_len, padding_len, CipherError, SessionCipher, BLOCK_SIZE};
use crate::deadline::within;

/// Size of an acknowledgment in bytes
pub const ACK_SIZE: usize = 8;
/// Acknowledgment written by every receiver; readers ignore the contents
pub const ACK: [u8; ACK_SIZE] = *b"received";
/// Longest accepted length line, not counting the newline
pub const MAX_LENGTH_DIGITS: usize = 20;
/// Default upper bound on a single payload
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Errors that can occur while framing a payload transfer
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// Ciphertext shorter than announced, or not a positive multiple of the block size
    #[error("invalid ciphertext length: expected {expected} bytes, received {received}")]
    InvalidLength { expected: usize, received: usize },

    #[error("malformed length line: {0}")]
    MalformedLength(String),

    #[error("payload of {len} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("ciphertext not followed by a newline terminator")]
    MissingTerminator,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CipherError> for FramingError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::InvalidLength(received) => FramingError::InvalidLength {
                expected: received.next_multiple_of(BLOCK_SIZE).max(BLOCK_SIZE),
                received,
            },
            CipherError::LengthMismatch {
                plaintext,
                ciphertext,
            } => FramingError::InvalidLength {
                expected: padded_len(plaintext),
                received: ciphertext,
            },
        }
    }
}

/// Limits applied to one transfer
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    /// Largest plaintext length a receiver will accept
    pub max_payload: usize,
    /// Bound on each individual read or write call, none by default
    ///
    /// A peer that keeps making progress on a large ciphertext is never cut off.
    pub io_timeout: Option<Duration>,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            io_timeout: None,
        }
    }
}

/// Encrypt and send `payload`
///
/// Blocks on the receiver's acknowledgment between the length line and the
/// ciphertext.
pub async fn send_payload<S>(
    stream: &mut S,
    cipher: &SessionCipher,
    payload: &[u8],
    limits: &FrameLimits,
) -> Result<(), FramingError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ciphertext = cipher.encrypt_padded(payload);
    let length_line = format!("{}\n", payload.len());

    within(limits.io_timeout, async {
        stream.write_all(length_line.as_bytes()).await?;
        stream.flush().await
    })
    .await
    .ok_or(FramingError::Timeout("length line write"))??;
    tracing::trace!(len = payload.len(), "sent length line");

    let mut ack = [0u8; ACK_SIZE];
    within(limits.io_timeout, stream.read_exact(&mut ack))
        .await
        .ok_or(FramingError::Timeout("transfer acknowledgment"))??;

    write_chunked(stream, &ciphertext, limits.io_timeout)
        .await
        .map_err(|e| timed_out(e, "ciphertext write"))?;
    within(limits.io_timeout, async {
        stream.write_all(b"\n").await?;
        stream.flush().await
    })
    .await
    .ok_or(FramingError::Timeout("ciphertext write"))??;

    tracing::debug!(
        plaintext = payload.len(),
        ciphertext = ciphertext.len(),
        "payload sent"
    );
    Ok(())
}

/// Receive and decrypt one payload
///
/// Padding is removed by the announced length alone, so trailing zero bytes
/// that belong to the payload are preserved.
pub async fn receive_payload<S>(
    stream: &mut S,
    cipher: &SessionCipher,
    limits: &FrameLimits,
) -> Result<Vec<u8>, FramingError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let len = within(limits.io_timeout, read_length_line(stream))
        .await
        .ok_or(FramingError::Timeout("length line"))??;
    if len > limits.max_payload {
        return Err(FramingError::PayloadTooLarge {
            len,
            max: limits.max_payload,
        });
    }

    within(limits.io_timeout, async {
        stream.write_all(&ACK).await?;
        stream.flush().await
    })
    .await
    .ok_or(FramingError::Timeout("transfer acknowledgment write"))??;

    let expected = len
        .checked_add(padding_len(len))
        .ok_or(FramingError::PayloadTooLarge {
            len,
            max: limits.max_payload,
        })?;
    let mut ciphertext = vec![0u8; expected];
    let received = read_full(stream, &mut ciphertext, limits.io_timeout)
        .await
        .map_err(|e| timed_out(e, "ciphertext"))?;
    if received < expected {
        return Err(FramingError::InvalidLength { expected, received });
    }

    let mut terminator = [0u8; 1];
    let read = within(limits.io_timeout, stream.read(&mut terminator))
        .await
        .ok_or(FramingError::Timeout("ciphertext terminator"))??;
    if read != 1 || terminator[0] != b'\n' {
        return Err(FramingError::MissingTerminator);
    }

    let plaintext = cipher.decrypt_padded(&ciphertext, len)?;
    tracing::debug!(plaintext = len, ciphertext = expected, "payload received");
    Ok(plaintext)
}

/// Read an ASCII decimal length terminated by `\n`
async fn read_length_line<S>(stream: &mut S) -> Result<usize, FramingError>
where
    S: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(MAX_LENGTH_DIGITS + 1);
    (&mut *stream)
        .take(MAX_LENGTH_DIGITS as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;

    match line.pop() {
        Some(b'\n') => {}
        Some(_) if line.len() >= MAX_LENGTH_DIGITS => {
            return Err(FramingError::MalformedLength(format!(
                "more than {} digits",
                MAX_LENGTH_DIGITS
            )))
        }
        _ => {
            return Err(FramingError::MalformedLength(
                "stream ended before newline".to_string(),
            ))
        }
    }

    if line.is_empty() || !line.iter().all(u8::is_ascii_digit) {
        return Err(FramingError::MalformedLength(format!(
            "not a decimal length: {:?}",
            String::from_utf8_lossy(&line)
        )));
    }

    String::from_utf8_lossy(&line)
        .parse::<usize>()
        .map_err(|e| FramingError::MalformedLength(e.to_string()))
}

/// Size of each timed write when sending a ciphertext
const WRITE_CHUNK: usize = 64 * 1024;

fn timed_out(e: std::io::Error, stage: &'static str) -> FramingError {
    if e.kind() == std::io::ErrorKind::TimedOut {
        FramingError::Timeout(stage)
    } else {
        FramingError::Io(e)
    }
}

/// Fill `buf` unless the stream ends first; returns the number of bytes read
///
/// `limit` bounds each read call, not the whole fill. Expiry surfaces as
/// [`std::io::ErrorKind::TimedOut`].
pub(crate) async fn read_full<S>(
    stream: &mut S,
    buf: &mut [u8],
    limit: Option<Duration>,
) -> std::io::Result<usize>
where
    S: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = within(limit, stream.read(&mut buf[filled..]))
            .await
            .ok_or(std::io::ErrorKind::TimedOut)??;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn write_chunked<S>(stream: &mut S, bytes: &[u8], limit: Option<Duration>) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    for chunk in bytes.chunks(WRITE_CHUNK) {
        within(limit, stream.write_all(chunk))
            .await
            .ok_or(std::io::ErrorKind::TimedOut)??;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::SESSION_KEY_SIZE;
    use tokio::io::{duplex, BufReader};

    fn cipher() -> SessionCipher {
        SessionCipher::new(&[3u8; SESSION_KEY_SIZE])
    }

    async fn round_trip(payload: Vec<u8>) -> Vec<u8> {
        let (a, b) = duplex(1024);
        let sender = tokio::spawn(async move {
            let mut a = BufReader::new(a);
            send_payload(&mut a, &cipher(), &payload, &FrameLimits::default())
                .await
                .unwrap();
        });

        let mut b = BufReader::new(b);
        let received = receive_payload(&mut b, &cipher(), &FrameLimits::default())
            .await
            .unwrap();
        sender.await.unwrap();
        received
    }

    #[tokio::test]
    async fn test_round_trip_lengths() {
        for len in [0usize, 1, 5, 16, 17, 4096, 10_000] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            assert_eq!(round_trip(payload.clone()).await, payload);
        }
    }

    #[tokio::test]
    async fn test_trailing_zeros_preserved() {
        let payload = vec![0xFF, 0, 0, 0];
        assert_eq!(round_trip(payload.clone()).await, payload);
    }

    #[tokio::test]
    async fn test_five_byte_payload_on_the_wire() {
        let (a, mut b) = duplex(1024);
        let payload = b"hello".to_vec();
        let sender = tokio::spawn(async move {
            let mut a = BufReader::new(a);
            send_payload(&mut a, &cipher(), &payload, &FrameLimits::default())
                .await
                .unwrap();
        });

        let mut line = [0u8; 2];
        b.read_exact(&mut line).await.unwrap();
        assert_eq!(&line, b"5\n");
        b.write_all(&ACK).await.unwrap();

        let mut ciphertext = [0u8; 16];
        b.read_exact(&mut ciphertext).await.unwrap();
        let mut terminator = [0u8; 1];
        b.read_exact(&mut terminator).await.unwrap();
        assert_eq!(terminator[0], b'\n');
        sender.await.unwrap();

        let plaintext = cipher().decrypt_padded(&ciphertext, 5).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[tokio::test]
    async fn test_short_ciphertext_is_invalid_length() {
        let (a, mut b) = duplex(1024);
        let receiver = tokio::spawn(async move {
            let mut a = BufReader::new(a);
            receive_payload(&mut a, &cipher(), &FrameLimits::default()).await
        });

        b.write_all(b"20\n").await.unwrap();
        let mut ack = [0u8; ACK_SIZE];
        b.read_exact(&mut ack).await.unwrap();
        b.write_all(&[0u8; 20]).await.unwrap();
        drop(b);

        let err = receiver.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            FramingError::InvalidLength {
                expected: 32,
                received: 20
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_length_line() {
        let (a, mut b) = duplex(1024);
        b.write_all(b"12x\n").await.unwrap();
        let mut a = BufReader::new(a);
        let err = receive_payload(&mut a, &cipher(), &FrameLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FramingError::MalformedLength(_)));
    }

    #[tokio::test]
    async fn test_oversized_length_line() {
        let (a, mut b) = duplex(1024);
        b.write_all(b"123456789012345678901234567890\n").await.unwrap();
        let mut a = BufReader::new(a);
        let err = receive_payload(&mut a, &cipher(), &FrameLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FramingError::MalformedLength(_)));
    }

    #[tokio::test]
    async fn test_payload_limit_enforced() {
        let (a, mut b) = duplex(1024);
        b.write_all(b"1000\n").await.unwrap();
        let limits = FrameLimits {
            max_payload: 999,
            ..Default::default()
        };
        let mut a = BufReader::new(a);
        let err = receive_payload(&mut a, &cipher(), &limits)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FramingError::PayloadTooLarge { len: 1000, max: 999 }
        ));
    }

    #[tokio::test]
    async fn test_missing_terminator() {
        let (a, mut b) = duplex(1024);
        let receiver = tokio::spawn(async move {
            let mut a = BufReader::new(a);
            receive_payload(&mut a, &cipher(), &FrameLimits::default()).await
        });

        b.write_all(b"3\n").await.unwrap();
        let mut ack = [0u8; ACK_SIZE];
        b.read_exact(&mut ack).await.unwrap();
        b.write_all(&cipher().encrypt_padded(b"abc")).await.unwrap();
        drop(b);

        let err = receiver.await.unwrap().unwrap_err();
        assert!(matches!(err, FramingError::MissingTerminator));
    }

    #[tokio::test]
    async fn test_padded_length_overflow_is_too_large() {
        let (a, mut b) = duplex(1024);
        b.write_all(format!("{}\n", usize::MAX).as_bytes()).await.unwrap();
        let limits = FrameLimits {
            max_payload: usize::MAX,
            ..Default::default()
        };
        let mut a = BufReader::new(a);
        let err = receive_payload(&mut a, &cipher(), &limits)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FramingError::PayloadTooLarge { len: usize::MAX, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sender_within_per_read_bound() {
        let (a, mut b) = duplex(1024);
        let limits = FrameLimits {
            io_timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        let receiver = tokio::spawn(async move {
            let mut a = BufReader::new(a);
            receive_payload(&mut a, &cipher(), &limits).await
        });

        let payload = [0x5Au8; 60];
        b.write_all(b"60\n").await.unwrap();
        let mut ack = [0u8; ACK_SIZE];
        b.read_exact(&mut ack).await.unwrap();

        // four blocks, each well inside the bound, together well past it
        for block in cipher().encrypt_padded(&payload).chunks(BLOCK_SIZE) {
            tokio::time::sleep(Duration::from_millis(600)).await;
            b.write_all(block).await.unwrap();
        }
        b.write_all(b"\n").await.unwrap();

        assert_eq!(receiver.await.unwrap().unwrap(), payload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_ciphertext_times_out() {
        let (a, mut b) = duplex(1024);
        let limits = FrameLimits {
            io_timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        let receiver = tokio::spawn(async move {
            let mut a = BufReader::new(a);
            receive_payload(&mut a, &cipher(), &limits).await
        });

        b.write_all(b"20\n").await.unwrap();
        let mut ack = [0u8; ACK_SIZE];
        b.read_exact(&mut ack).await.unwrap();
        b.write_all(&[0u8; 16]).await.unwrap();

        let err = receiver.await.unwrap().unwrap_err();
        assert!(matches!(err, FramingError::Timeout("ciphertext")));
        drop(b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_receiver_times_out() {
        let (a, _b) = duplex(1024);
        let limits = FrameLimits {
            io_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let mut a = BufReader::new(a);
        let err = send_payload(&mut a, &cipher(), b"data", &limits)
            .await
            .unwrap_err();
        assert!(matches!(err, FramingError::Timeout(_)));
    }
}
