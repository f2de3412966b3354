//! Operator prompt for first-contact peers

use std::fmt;
use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use common::admission::{AdmissionDecision, AdmissionOracle};
use common::crypto::PublicKey;
use tokio::sync::Mutex;

/// Asks whether to admit a new peer
///
/// Input lines come from a single reader thread that lives as long as the
/// prompt, so a question abandoned by an admission timeout never leaves a
/// read behind that swallows the next answer. Lines typed while no question
/// is open are discarded. Concurrent connections queue on the mutex so only
/// one question is on screen at a time. End of input counts as a rejection.
pub struct ConsolePrompt {
    console: Mutex<Console>,
}

struct Console {
    lines: flume::Receiver<String>,
    output: Box<dyn Write + Send>,
}

impl ConsolePrompt {
    /// Prompt on stderr, answers from stdin
    pub fn stdin() -> Self {
        let (tx, rx) = flume::unbounded();
        std::thread::spawn(move || forward_lines(io::stdin().lock(), tx));
        Self::new(rx, Box::new(io::stderr()))
    }

    /// Prompt on `output`, answers from an already running line source
    pub fn new(lines: flume::Receiver<String>, output: Box<dyn Write + Send>) -> Self {
        Self {
            console: Mutex::new(Console { lines, output }),
        }
    }
}

impl fmt::Debug for ConsolePrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConsolePrompt(..)")
    }
}

/// Send every line of `input` until it ends or nobody listens
fn forward_lines<R: BufRead>(input: R, lines: flume::Sender<String>) {
    for line in input.lines() {
        match line {
            Ok(line) => {
                if lines.send(line).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("console input failed: {}", e);
                return;
            }
        }
    }
}

#[async_trait]
impl AdmissionOracle for ConsolePrompt {
    async fn decide(&self, peer: &PublicKey) -> AdmissionDecision {
        let mut console = self.console.lock().await;
        match console.ask(&peer.to_hex()).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!("admission prompt failed: {}", e);
                AdmissionDecision::Reject
            }
        }
    }
}

impl Console {
    /// Ask until a recognizable answer arrives
    ///
    /// Cancel safe: dropping this future consumes no line.
    async fn ask(&mut self, peer_hex: &str) -> io::Result<AdmissionDecision> {
        let stale = self.lines.drain().count();
        if stale > 0 {
            tracing::debug!(lines = stale, "discarded console input typed between prompts");
        }

        writeln!(self.output, "New peer wants to join the group:\n  {}", peer_hex)?;
        loop {
            write!(self.output, "Admit this peer? [y/n] ")?;
            self.output.flush()?;

            let line = match self.lines.recv_async().await {
                Ok(line) => line,
                Err(flume::RecvError::Disconnected) => {
                    writeln!(self.output)?;
                    return Ok(AdmissionDecision::Reject);
                }
            };
            match parse_answer(&line) {
                Some(decision) => return Ok(decision),
                None => writeln!(self.output, "please answer y or n")?,
            }
        }
    }
}

fn parse_answer(line: &str) -> Option<AdmissionDecision> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(AdmissionDecision::Admit),
        "n" | "no" => Some(AdmissionDecision::Reject),
        _ => None,
    }
}
