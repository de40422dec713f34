use std::sync::Arc;

use super::offsets::OffsetStore;
use super::transfer::{download_artifact, TransferOptions};
use crate::artifact::ArtifactDescriptor;
use crate::failure::{FailurePayload, TransferError};
use crate::jobs::{JobContext, WorkOutcome, Worker};
use crate::storage::ArtifactPaths;

/// Download job body. Classifies every error into a [`FailurePayload`];
/// transient ones are handed back to the scheduler for a backoff retry.
pub struct DownloadWorker {
    descriptor: ArtifactDescriptor,
    paths: ArtifactPaths,
    store: Arc<dyn OffsetStore>,
    opts: TransferOptions,
}

impl DownloadWorker {
    pub fn new(
        descriptor: ArtifactDescriptor,
        paths: ArtifactPaths,
        store: Arc<dyn OffsetStore>,
        opts: TransferOptions,
    ) -> Self {
        Self {
            descriptor,
            paths,
            store,
            opts,
        }
    }

    fn payload(&self, err: &TransferError) -> FailurePayload {
        let message = match err {
            TransferError::Http { message, .. } if !message.is_empty() => message.clone(),
            other => other.to_string(),
        };
        FailurePayload {
            failure_type: Some(err.classify()),
            url: self.descriptor.url().map(str::to_string),
            filename: Some(self.descriptor.filename().to_string()),
            http_code: err.http_code(),
            http_message: Some(message),
        }
    }
}

impl Worker for DownloadWorker {
    fn run(&self, ctx: &JobContext) -> WorkOutcome {
        let result = download_artifact(
            &self.descriptor,
            &self.paths,
            self.store.as_ref(),
            &self.opts,
            ctx,
        );
        match result {
            Ok(_) => WorkOutcome::Success,
            Err(e) if e.is_abort() => WorkOutcome::Aborted,
            Err(e) => {
                let payload = self.payload(&e);
                tracing::warn!(
                    artifact = self.descriptor.id(),
                    run_id = ctx.run_id(),
                    attempt = ctx.attempt(),
                    failure = ?payload.failure_type,
                    error = %e,
                    "download attempt failed"
                );
                if e.classify().is_transient() {
                    WorkOutcome::Retry(payload)
                } else {
                    WorkOutcome::Failure(Some(payload))
                }
            }
        }
    }
}
