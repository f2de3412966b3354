pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pairlink")]
#[command(about = "Pairwise ECDH handshake with persistent group membership")]
pub struct Args {
    /// Path to the pairlink directory (defaults to ~/.pairlink)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Also write daily rolling log files into this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
