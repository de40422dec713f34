//! `otadl fetch`, `otadl resume` and `otadl retry`: start work and follow it.

use anyhow::{Context, Result};
use otadl_core::config::OtaConfig;
use otadl_core::{DownloadStatus, Engine};
use std::path::Path;
use std::time::Duration;
use tracing::Instrument;

use super::follow::follow;

const RECOVERY_SETTLE: Duration = Duration::from_secs(2);

/// Start the artifact described by the metadata file at `path`.
pub async fn run_fetch(cfg: OtaConfig, path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read metadata {}", path.display()))?;
    let engine = Engine::open(cfg).await?;
    engine.recover(false).await?;

    let run_id = engine.start_metadata(&json).await?;
    if let Some(d) = engine.descriptor() {
        println!("fetching {} ({} bytes) as run {}", d.filename(), d.size_bytes(), run_id);
    }
    finish(&engine, run_id).await
}

/// Continue the recorded artifact from its stored offset.
pub async fn run_resume(cfg: OtaConfig) -> Result<()> {
    let engine = Engine::open(cfg).await?;
    let Some(descriptor) = engine.recover(false).await? else {
        println!("Nothing to resume.");
        return Ok(());
    };
    let run_id = engine.resume().await?;
    println!("resuming {} as run {}", descriptor.filename(), run_id);
    finish(&engine, run_id).await
}

/// Retry the recorded artifact after a failure.
pub async fn run_retry(cfg: OtaConfig) -> Result<()> {
    let engine = Engine::open(cfg).await?;
    if engine.recover(false).await?.is_none() {
        println!("Nothing to retry.");
        return Ok(());
    }
    // Recovered records reach the status stream through the reconciler.
    let mut rx = engine.subscribe();
    let _ = tokio::time::timeout(
        RECOVERY_SETTLE,
        rx.wait_for(|u| u.status != DownloadStatus::NotDownloading),
    )
    .await;
    let run_id = engine.retry().await?;
    println!("retrying as run {}", run_id);
    finish(&engine, run_id).await
}

async fn finish(engine: &Engine, run_id: u64) -> Result<()> {
    let artifact = engine.descriptor().map(|d| d.id().to_string()).unwrap_or_default();
    let span = tracing::info_span!("follow", artifact = %artifact, run_id);
    let status = follow(engine, run_id).instrument(span).await?;
    match status {
        DownloadStatus::VerificationCompleted => {
            if let Some(paths) = engine.paths() {
                println!("verified: {}", paths.final_path.display());
            }
            Ok(())
        }
        DownloadStatus::Paused => Ok(()),
        DownloadStatus::VerificationFailed => anyhow::bail!("checksum mismatch"),
        other => anyhow::bail!("download ended as {other}"),
    }
}
