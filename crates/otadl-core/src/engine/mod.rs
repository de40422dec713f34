//! Caller-facing engine: start, pause, resume, retry, delete, observe.
//!
//! The engine schedules work and observes it; it never transfers or hashes
//! bytes itself. Every status the caller sees comes from the reconciler task
//! (see [`crate::reconcile`]), including pre-flight rejections.

mod error;
mod reconciler;
mod recovery;

pub use error::EngineError;

use anyhow::Context;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::artifact::{self, ArtifactDescriptor};
use crate::config::OtaConfig;
use crate::control::PauseIntent;
use crate::downloader::{DbOffsetStore, DownloadWorker, OffsetStore, TransferOptions};
use crate::failure::RetryAction;
use crate::jobs::{JobInfo, JobScheduler, JobState, DOWNLOAD_JOB_KEY, VERIFY_JOB_KEY};
use crate::reconcile::{derive_status, DownloadStatus, StatusFilter, StatusUpdate};
use crate::state_db::{StateDb, TransferState};
use crate::storage::{self, ArtifactPaths};

use reconciler::{Event, Reconciler};

/// State shared between the engine handles and the reconciler task.
struct Shared {
    scheduler: JobScheduler,
    intent: PauseIntent,
    descriptor: Mutex<Option<ArtifactDescriptor>>,
    status_tx: watch::Sender<StatusUpdate>,
    temp_dir: PathBuf,
    download_dir: PathBuf,
}

impl Shared {
    fn descriptor(&self) -> Option<ArtifactDescriptor> {
        self.descriptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_descriptor(&self, descriptor: Option<ArtifactDescriptor>) {
        *self.descriptor.lock().unwrap_or_else(PoisonError::into_inner) = descriptor;
    }

    fn paths(&self, descriptor: &ArtifactDescriptor) -> io::Result<ArtifactPaths> {
        ArtifactPaths::derive(&self.temp_dir, &self.download_dir, descriptor.filename())
    }
}

/// Handle to the download/verification engine. Cheap to clone; the
/// reconciler task stops when the last handle is dropped.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
    db: StateDb,
    store: Arc<dyn OffsetStore>,
    opts: TransferOptions,
    events: mpsc::UnboundedSender<Event>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("status", &self.status().status)
            .field("temp_dir", &self.shared.temp_dir)
            .field("download_dir", &self.shared.download_dir)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Open the engine on the default state database.
    pub async fn open(config: OtaConfig) -> anyhow::Result<Self> {
        let db = StateDb::open_default().await?;
        Self::with_db(config, db).await
    }

    /// Open the engine on `db`. Must be called inside a tokio runtime.
    pub async fn with_db(config: OtaConfig, db: StateDb) -> anyhow::Result<Self> {
        let (temp_dir, download_dir) = config.resolve_dirs()?;
        let scheduler = JobScheduler::persistent(
            config.max_concurrent_jobs,
            config.retry_policy(),
            db.clone(),
        )
        .await
        .context("failed to open job scheduler")?;
        let (status_tx, _) = watch::channel(StatusUpdate::default());
        let shared = Arc::new(Shared {
            scheduler,
            intent: PauseIntent::new(),
            descriptor: Mutex::new(None),
            status_tx,
            temp_dir,
            download_dir,
        });

        let (events, events_rx) = mpsc::unbounded_channel();
        Reconciler::spawn(
            Arc::clone(&shared),
            events_rx,
            StatusFilter::new(config.always_forward.clone()),
            config.eta_window,
        );

        let store: Arc<dyn OffsetStore> = Arc::new(DbOffsetStore::new(db.clone(), Handle::current()));
        tracing::debug!(
            temp_dir = %shared.temp_dir.display(),
            download_dir = %shared.download_dir.display(),
            "engine opened"
        );
        Ok(Self {
            shared,
            db,
            store,
            opts: TransferOptions::from(&config),
            events,
        })
    }

    /// Observe status updates. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<StatusUpdate> {
        self.shared.status_tx.subscribe()
    }

    pub fn status(&self) -> StatusUpdate {
        self.shared.status_tx.borrow().clone()
    }

    /// Latest snapshot of the job under `key`.
    pub fn job(&self, key: &str) -> Option<JobInfo> {
        self.shared.scheduler.current(key)
    }

    /// The artifact the engine is currently working on.
    pub fn descriptor(&self) -> Option<ArtifactDescriptor> {
        self.shared.descriptor()
    }

    /// Where the artifact is written to while downloading and once finished.
    pub fn paths(&self) -> Option<ArtifactPaths> {
        let descriptor = self.shared.descriptor()?;
        self.shared.paths(&descriptor).ok()
    }

    /// Persisted resume offset for the current artifact.
    pub async fn transfer_state(&self) -> anyhow::Result<Option<TransferState>> {
        match self.shared.descriptor() {
            Some(d) => self.db.load_transfer(d.id()).await,
            None => Ok(None),
        }
    }

    /// Start downloading `descriptor`, replacing any download in flight.
    ///
    /// A descriptor that fails pre-flight is rejected without creating a
    /// job; observers see `Failed` with the pre-flight failure type.
    /// Returns the run id of the new download job.
    pub async fn start(&self, descriptor: Option<ArtifactDescriptor>) -> Result<u64, EngineError> {
        if let Err(failure) = artifact::preflight(descriptor.as_ref()) {
            tracing::warn!(%failure, "descriptor rejected before enqueue");
            let _ = self.events.send(Event::Preflight(failure));
            return Err(EngineError::Rejected(failure));
        }
        let Some(descriptor) = descriptor else {
            return Err(EngineError::NoArtifact);
        };
        let paths = self.shared.paths(&descriptor).context("invalid artifact filename")?;
        self.check_storage(&descriptor, &paths)?;

        self.drop_verification().await;
        self.shared.set_descriptor(Some(descriptor.clone()));
        self.enqueue_download(descriptor, paths)
    }

    /// Parse server update metadata and [`start`](Self::start) it. A `null`
    /// document counts as a missing descriptor.
    pub async fn start_metadata(&self, json: &str) -> Result<u64, EngineError> {
        let descriptor = ArtifactDescriptor::from_metadata_json(json)?;
        self.start(descriptor).await
    }

    /// Cancel the download, keeping partial data and the offset.
    pub async fn pause(&self) -> Result<(), EngineError> {
        self.shared.intent.set(true);
        let cancelled = self.shared.scheduler.cancel(DOWNLOAD_JOB_KEY).await;
        if !matches!(&cancelled, Some(info) if info.state == JobState::Cancelled) {
            // Nothing was running; the intent must not leak into a later cancel.
            self.shared.intent.take();
        }
        Ok(())
    }

    /// Continue the current artifact from its persisted offset.
    ///
    /// Only a paused (or stopped) download can be resumed; failures go
    /// through [`retry`](Self::retry) and a finished artifact needs a new
    /// [`start`](Self::start).
    pub async fn resume(&self) -> Result<u64, EngineError> {
        if self.shared.descriptor().is_none() {
            return Err(EngineError::NoArtifact);
        }
        // Judged from the job snapshots; the published status may lag.
        let download = self.shared.scheduler.current(DOWNLOAD_JOB_KEY);
        let verify = self.shared.scheduler.current(VERIFY_JOB_KEY);
        let (status, _) = derive_status(download.as_ref(), verify.as_ref(), true);
        match status {
            DownloadStatus::Paused | DownloadStatus::NotDownloading => self.continue_download().await,
            other => Err(EngineError::NotResumable(other)),
        }
    }

    /// Re-enqueue the current artifact from its offset. A new download
    /// always gets a fresh verification.
    async fn continue_download(&self) -> Result<u64, EngineError> {
        let descriptor = self.shared.descriptor().ok_or(EngineError::NoArtifact)?;
        let paths = self.shared.paths(&descriptor).context("invalid artifact filename")?;
        self.drop_verification().await;
        self.enqueue_download(descriptor, paths)
    }

    /// Retry after `Failed` or `VerificationFailed`.
    ///
    /// Transient failures resume from the stored offset; other download
    /// failures and a failed verification start over from zero. Pre-flight
    /// failures need a new descriptor and are not retryable.
    pub async fn retry(&self) -> Result<u64, EngineError> {
        let current = self.status();
        let action = match current.status {
            DownloadStatus::VerificationFailed => RetryAction::Restart,
            DownloadStatus::Failed => current
                .failure
                .map(|f| f.retry_action())
                .unwrap_or(RetryAction::None),
            other => return Err(EngineError::NotRetryable(other)),
        };
        let descriptor = match (action, self.shared.descriptor()) {
            (RetryAction::None, _) => return Err(EngineError::NotRetryable(current.status)),
            (_, None) => return Err(EngineError::NoArtifact),
            (_, Some(d)) => d,
        };
        let paths = self.shared.paths(&descriptor).context("invalid artifact filename")?;
        if action == RetryAction::Restart {
            tracing::info!(artifact = descriptor.id(), "retrying from scratch");
            self.drop_verification().await;
            self.discard_artifact(&descriptor, &paths).await?;
        }
        self.enqueue_download(descriptor, paths)
    }

    /// Cancel everything and erase the offset, partial file and final file.
    pub async fn delete(&self) -> Result<(), EngineError> {
        self.shared.intent.set(false);
        self.shared.scheduler.cancel(DOWNLOAD_JOB_KEY).await;
        self.drop_verification().await;
        if let Some(descriptor) = self.shared.descriptor() {
            let paths = self.shared.paths(&descriptor).context("invalid artifact filename")?;
            self.discard_artifact(&descriptor, &paths).await?;
        }
        self.shared.scheduler.clear(DOWNLOAD_JOB_KEY).await;
        self.shared.set_descriptor(None);
        Ok(())
    }

    fn enqueue_download(&self, descriptor: ArtifactDescriptor, paths: ArtifactPaths) -> Result<u64, EngineError> {
        let input = serde_json::to_string(&descriptor).context("failed to encode descriptor")?;
        let worker = DownloadWorker::new(descriptor, paths, Arc::clone(&self.store), self.opts.clone());
        Ok(self
            .shared
            .scheduler
            .enqueue(DOWNLOAD_JOB_KEY, Arc::new(worker), Some(input)))
    }

    async fn drop_verification(&self) {
        self.shared.scheduler.cancel(VERIFY_JOB_KEY).await;
        self.shared.scheduler.clear(VERIFY_JOB_KEY).await;
    }

    async fn discard_artifact(&self, descriptor: &ArtifactDescriptor, paths: &ArtifactPaths) -> anyhow::Result<()> {
        self.db.clear_transfer(descriptor.id()).await?;
        paths
            .remove_all()
            .with_context(|| format!("failed to remove files for {}", descriptor.id()))?;
        tracing::info!(artifact = descriptor.id(), "artifact state discarded");
        Ok(())
    }

    fn check_storage(&self, descriptor: &ArtifactDescriptor, paths: &ArtifactPaths) -> Result<(), EngineError> {
        let have = storage::file_len(&paths.temp).unwrap_or(0);
        let needed = descriptor.size_bytes().saturating_sub(have);
        if needed == 0 {
            return Ok(());
        }
        match storage::available_space(&self.shared.temp_dir) {
            Ok(Some(available)) if available < needed => {
                tracing::warn!(needed, available, "not enough free space for artifact");
                Err(EngineError::InsufficientStorage { needed, available })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "free space check unavailable");
                Ok(())
            }
        }
    }
}
