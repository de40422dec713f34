use serde::{Deserialize, Serialize};
use std::fmt;

use crate::failure::DownloadFailure;
use crate::progress::WorkProgress;

/// User-facing lifecycle of the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    NotDownloading,
    Queued,
    Downloading,
    Paused,
    Completed,
    Verifying,
    VerificationCompleted,
    VerificationFailed,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::NotDownloading => "not_downloading",
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Verifying => "verifying",
            DownloadStatus::VerificationCompleted => "verification_completed",
            DownloadStatus::VerificationFailed => "verification_failed",
            DownloadStatus::Failed => "failed",
        }
    }

    /// No further transition happens without a caller action.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            DownloadStatus::NotDownloading
                | DownloadStatus::Paused
                | DownloadStatus::VerificationCompleted
                | DownloadStatus::VerificationFailed
                | DownloadStatus::Failed
        )
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What observers receive. `failure` is set only with `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub status: DownloadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<WorkProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<DownloadFailure>,
}

impl StatusUpdate {
    pub fn new(status: DownloadStatus) -> Self {
        Self {
            status,
            progress: None,
            failure: None,
        }
    }

    pub fn failed(failure: DownloadFailure) -> Self {
        Self {
            status: DownloadStatus::Failed,
            progress: None,
            failure: Some(failure),
        }
    }
}

impl Default for StatusUpdate {
    fn default() -> Self {
        Self::new(DownloadStatus::NotDownloading)
    }
}
