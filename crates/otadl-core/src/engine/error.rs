use crate::artifact::DescriptorError;
use crate::failure::DownloadFailure;
use crate::reconcile::DownloadStatus;

/// Error returned by [`Engine`](super::Engine) operations. Job failures are
/// not errors here; they surface through the status stream.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("descriptor rejected: {0}")]
    Rejected(DownloadFailure),
    #[error("invalid update metadata: {0}")]
    Metadata(#[from] DescriptorError),
    #[error("insufficient storage: need {needed} bytes, {available} available")]
    InsufficientStorage { needed: u64, available: u64 },
    #[error("no artifact has been started")]
    NoArtifact,
    #[error("nothing to retry while {0}")]
    NotRetryable(DownloadStatus),
    #[error("nothing to resume while {0}")]
    NotResumable(DownloadStatus),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
