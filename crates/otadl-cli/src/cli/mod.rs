//! CLI for the otadl OTA download engine.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use otadl_core::config;
use std::path::PathBuf;

use commands::{run_checksum, run_delete, run_fetch, run_resume, run_retry, run_status};

/// Top-level CLI for the otadl OTA download engine.
#[derive(Debug, Parser)]
#[command(name = "otadl")]
#[command(about = "otadl: resumable OTA firmware download and verification", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download and verify the artifact described by an update metadata file.
    Fetch {
        /// JSON metadata as returned by the update server.
        metadata: PathBuf,
    },

    /// Continue a paused or interrupted download.
    Resume,

    /// Retry after a failed download or verification.
    Retry,

    /// Show the current artifact, job records and resume offsets.
    Status,

    /// Cancel all work and erase partial and downloaded files.
    Delete,

    /// Compute SHA-256 of a file.
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch { metadata } => run_fetch(cfg, &metadata).await?,
            CliCommand::Resume => run_resume(cfg).await?,
            CliCommand::Retry => run_retry(cfg).await?,
            CliCommand::Status => run_status().await?,
            CliCommand::Delete => run_delete(cfg).await?,
            CliCommand::Checksum { path } => run_checksum(&path).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
