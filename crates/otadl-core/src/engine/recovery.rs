//! Rebuilding engine state from durable job records after a restart.

use std::sync::Arc;

use super::{Engine, EngineError};
use crate::artifact::ArtifactDescriptor;
use crate::checksum::VerifyWorker;
use crate::jobs::{JobInfo, JobState, DOWNLOAD_JOB_KEY, VERIFY_JOB_KEY};
use crate::state_db::JobRecord;

fn snapshot(record: &JobRecord) -> JobInfo {
    JobInfo {
        output: record.output.clone(),
        ..JobInfo::new(record.run_id, record.state)
    }
}

impl Engine {
    /// Restore the previous session from the state database.
    ///
    /// Finished jobs are republished as recorded. A download that was
    /// queued or running when the process stopped is re-enqueued when
    /// `resume_interrupted` is set, and otherwise reported as paused. A
    /// cancelled download with a persisted offset is reported as paused.
    /// Returns the recovered descriptor, if any.
    pub async fn recover(&self, resume_interrupted: bool) -> Result<Option<ArtifactDescriptor>, EngineError> {
        let download = self.db.get_job(DOWNLOAD_JOB_KEY).await?;
        let verify = self.db.get_job(VERIFY_JOB_KEY).await?;

        let Some(download) = download else {
            tracing::debug!("no download on record");
            return Ok(None);
        };
        let descriptor = match download.input.as_deref().map(serde_json::from_str::<ArtifactDescriptor>) {
            Some(Ok(d)) => d,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "stored descriptor unreadable, dropping records");
                self.shared.scheduler.clear(VERIFY_JOB_KEY).await;
                self.shared.scheduler.clear(DOWNLOAD_JOB_KEY).await;
                return Ok(None);
            }
            None => return Ok(None),
        };
        self.shared.set_descriptor(Some(descriptor.clone()));

        // Verify first: the reconciler must see it before a restored
        // download success, or it would trigger a second verification.
        if let Some(verify) = &verify {
            match verify.state {
                JobState::Succeeded | JobState::Failed => {
                    self.shared.scheduler.restore(VERIFY_JOB_KEY, snapshot(verify));
                }
                JobState::Enqueued | JobState::Blocked | JobState::Running => {
                    let paths = self.shared.paths(&descriptor).map_err(anyhow::Error::from)?;
                    let worker = VerifyWorker::new(
                        paths.final_path,
                        descriptor.expected_checksum(),
                        descriptor.filename(),
                    );
                    self.shared
                        .scheduler
                        .enqueue(VERIFY_JOB_KEY, Arc::new(worker), verify.input.clone());
                }
                JobState::Cancelled => self.shared.scheduler.clear(VERIFY_JOB_KEY).await,
            }
        }

        let offset = self.db.load_transfer(descriptor.id()).await?;
        match download.state {
            JobState::Enqueued | JobState::Blocked | JobState::Running if resume_interrupted => {
                tracing::info!(artifact = descriptor.id(), run_id = download.run_id, "resuming interrupted download");
                self.continue_download().await?;
            }
            JobState::Enqueued | JobState::Blocked | JobState::Running | JobState::Cancelled => {
                let paused = offset.is_some_and(|o| o.bytes_done() > 0);
                self.shared.intent.set(paused);
                self.shared.scheduler.restore(
                    DOWNLOAD_JOB_KEY,
                    JobInfo::new(download.run_id, JobState::Cancelled),
                );
            }
            JobState::Succeeded | JobState::Failed => {
                self.shared.scheduler.restore(DOWNLOAD_JOB_KEY, snapshot(&download));
            }
        }
        tracing::info!(
            artifact = descriptor.id(),
            state = download.state.as_str(),
            bytes_done = offset.map(|o| o.bytes_done()),
            "session recovered"
        );
        Ok(Some(descriptor))
    }
}
