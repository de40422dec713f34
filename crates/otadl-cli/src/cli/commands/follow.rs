//! Follow the engine's status stream until the run settles or Ctrl-C.

use anyhow::Result;
use otadl_core::jobs::{JobState, DOWNLOAD_JOB_KEY};
use otadl_core::{DownloadStatus, Engine, StatusUpdate};

/// Print status changes for download run `run_id` until it settles.
///
/// Ctrl-C pauses the download, keeping the partial file and offset, so a
/// later `otadl resume` continues where this one stopped.
pub async fn follow(engine: &Engine, run_id: u64) -> Result<DownloadStatus> {
    let mut rx = engine.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let update = rx.borrow_and_update().clone();
        print_update(&update);
        if settled_for(engine, run_id, update.status) {
            return Ok(update.status);
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    anyhow::bail!("engine stopped before the download settled");
                }
            }
            signal = &mut ctrl_c => {
                signal?;
                eprintln!("interrupted, pausing download");
                engine.pause().await?;
                return Ok(DownloadStatus::Paused);
            }
        }
    }
}

/// `status` is the settled outcome of run `run_id`, not a leftover from
/// before it was enqueued.
fn settled_for(engine: &Engine, run_id: u64, status: DownloadStatus) -> bool {
    let Some(job) = engine.job(DOWNLOAD_JOB_KEY) else {
        return status == DownloadStatus::NotDownloading;
    };
    if job.run_id > run_id {
        return true;
    }
    if job.run_id < run_id {
        return false;
    }
    matches!(
        (job.state, status),
        (
            JobState::Succeeded,
            DownloadStatus::VerificationCompleted | DownloadStatus::VerificationFailed
        ) | (JobState::Failed, DownloadStatus::Failed)
            | (
                JobState::Cancelled,
                DownloadStatus::Paused | DownloadStatus::NotDownloading
            )
    )
}

fn print_update(update: &StatusUpdate) {
    match (&update.progress, update.failure) {
        (_, Some(failure)) => println!("{:<24} {}", update.status, failure),
        (Some(p), None) => {
            let pct = p
                .current_progress_percent
                .map(|v| format!("{v:>3}%"))
                .unwrap_or_else(|| "   -".to_string());
            println!("{:<24} {} {:<24} eta {}", update.status, pct, p.bytes_text, p.eta_text);
        }
        (None, None) => println!("{}", update.status),
    }
}
