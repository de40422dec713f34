//! The single task that turns job snapshots into status updates.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::Shared;
use crate::checksum::VerifyWorker;
use crate::failure::DownloadFailure;
use crate::jobs::{JobInfo, JobState, DOWNLOAD_JOB_KEY, VERIFY_JOB_KEY};
use crate::progress::ProgressModel;
use crate::reconcile::{derive_status, DownloadStatus, StatusFilter, StatusUpdate};

/// Out-of-band input to the reconciler.
#[derive(Debug)]
pub(super) enum Event {
    /// A start request failed pre-flight; no job was created.
    Preflight(DownloadFailure),
}

pub(super) struct Reconciler {
    shared: Arc<Shared>,
    events: mpsc::UnboundedReceiver<Event>,
    download_rx: watch::Receiver<Option<JobInfo>>,
    verify_rx: watch::Receiver<Option<JobInfo>>,
    filter: StatusFilter,
    model: ProgressModel,
    /// Download run the progress model is tracking.
    progress_run: Option<u64>,
    /// Pause intent, resolved once per cancelled download run.
    cancel_resolution: Option<(u64, bool)>,
    /// Download run a verification was already triggered for.
    verified_run: Option<u64>,
}

impl Reconciler {
    /// Start the loop. It ends when every engine handle is dropped.
    pub(super) fn spawn(
        shared: Arc<Shared>,
        events: mpsc::UnboundedReceiver<Event>,
        filter: StatusFilter,
        eta_window: usize,
    ) -> JoinHandle<()> {
        let download_rx = shared.scheduler.subscribe(DOWNLOAD_JOB_KEY);
        let verify_rx = shared.scheduler.subscribe(VERIFY_JOB_KEY);
        let reconciler = Reconciler {
            shared,
            events,
            download_rx,
            verify_rx,
            filter,
            model: ProgressModel::new(eta_window),
            progress_run: None,
            cancel_resolution: None,
            verified_run: None,
        };
        tokio::spawn(reconciler.run())
    }

    async fn run(mut self) {
        self.recompute();
        loop {
            let event = tokio::select! {
                changed = self.download_rx.changed() => match changed {
                    Ok(()) => None,
                    Err(_) => break,
                },
                changed = self.verify_rx.changed() => match changed {
                    Ok(()) => None,
                    Err(_) => break,
                },
                event = self.events.recv() => match event {
                    Some(event) => Some(event),
                    None => break,
                },
            };
            match event {
                Some(Event::Preflight(failure)) => self.publish(StatusUpdate::failed(failure)),
                None => self.recompute(),
            }
        }
        tracing::debug!("reconciler stopped");
    }

    fn recompute(&mut self) {
        let download = self.download_rx.borrow_and_update().clone();
        let verify = self.verify_rx.borrow_and_update().clone();

        let cancel_means_pause = self.resolve_pause_intent(download.as_ref());
        self.trigger_verify(download.as_ref(), verify.as_ref());

        let (status, failure) = derive_status(download.as_ref(), verify.as_ref(), cancel_means_pause);
        let progress = match status {
            DownloadStatus::Queued
            | DownloadStatus::Downloading
            | DownloadStatus::Completed
            | DownloadStatus::Paused
            | DownloadStatus::Failed => download.as_ref().and_then(|d| {
                let p = d.progress?;
                if self.progress_run != Some(d.run_id) {
                    self.model.reset();
                    self.progress_run = Some(d.run_id);
                }
                // Unchanged ticks reuse the last value without resampling.
                Some(self.model.update(p.bytes_done, p.total_bytes, Instant::now()))
            }),
            _ => None,
        };
        self.publish(StatusUpdate {
            status,
            progress,
            failure,
        });
    }

    fn resolve_pause_intent(&mut self, download: Option<&JobInfo>) -> bool {
        let Some(info) = download.filter(|d| d.state == JobState::Cancelled) else {
            return false;
        };
        match self.cancel_resolution {
            Some((run_id, pause)) if run_id == info.run_id => pause,
            _ => {
                let pause = self.shared.intent.take();
                tracing::debug!(run_id = info.run_id, pause, "download cancel resolved");
                self.cancel_resolution = Some((info.run_id, pause));
                pause
            }
        }
    }

    /// Enqueue verification once per successful download run, unless a
    /// verify job is already on record.
    fn trigger_verify(&mut self, download: Option<&JobInfo>, verify: Option<&JobInfo>) {
        let Some(info) = download.filter(|d| d.state == JobState::Succeeded) else {
            return;
        };
        if self.verified_run == Some(info.run_id) {
            return;
        }
        self.verified_run = Some(info.run_id);
        if verify.is_some() {
            return;
        }
        let Some(descriptor) = self.shared.descriptor() else {
            tracing::warn!(run_id = info.run_id, "download succeeded without a descriptor");
            return;
        };
        let paths = match self.shared.paths(&descriptor) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(error = %e, "cannot derive artifact paths for verification");
                return;
            }
        };
        let worker = VerifyWorker::new(
            paths.final_path,
            descriptor.expected_checksum(),
            descriptor.filename(),
        );
        let input = serde_json::to_string(&descriptor).ok();
        self.shared
            .scheduler
            .enqueue(VERIFY_JOB_KEY, Arc::new(worker), input);
    }

    fn publish(&mut self, update: StatusUpdate) {
        if !self.filter.admit(update.status, update.failure) {
            return;
        }
        if update.status != DownloadStatus::Downloading {
            tracing::info!(status = %update.status, failure = ?update.failure, "status changed");
        }
        self.shared.status_tx.send_replace(update);
    }
}
