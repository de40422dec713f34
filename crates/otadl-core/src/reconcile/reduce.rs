//! The merge function.

use super::status::DownloadStatus;
use crate::failure::DownloadFailure;
use crate::jobs::{JobInfo, JobState};

/// A job stream feeding the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSource {
    Verify,
    Download,
}

/// Sources in decreasing priority. The first one with an opinion wins.
pub const PRECEDENCE: [JobSource; 2] = [JobSource::Verify, JobSource::Download];

/// Derive the current status from the latest snapshot of each job.
///
/// `cancel_means_pause` is the pause intent resolved for a cancelled
/// download run; it is ignored otherwise.
pub fn derive_status(
    download: Option<&JobInfo>,
    verify: Option<&JobInfo>,
    cancel_means_pause: bool,
) -> (DownloadStatus, Option<DownloadFailure>) {
    for source in PRECEDENCE {
        let decided = match source {
            JobSource::Verify => from_verify(verify),
            JobSource::Download => Some(from_download(download, cancel_means_pause)),
        };
        if let Some(decided) = decided {
            return decided;
        }
    }
    (DownloadStatus::NotDownloading, None)
}

/// `None` when there is no verify job or it was cancelled.
fn from_verify(verify: Option<&JobInfo>) -> Option<(DownloadStatus, Option<DownloadFailure>)> {
    let status = match verify?.state {
        JobState::Enqueued | JobState::Blocked | JobState::Running => DownloadStatus::Verifying,
        JobState::Succeeded => DownloadStatus::VerificationCompleted,
        JobState::Failed => DownloadStatus::VerificationFailed,
        JobState::Cancelled => return None,
    };
    Some((status, None))
}

fn from_download(
    download: Option<&JobInfo>,
    cancel_means_pause: bool,
) -> (DownloadStatus, Option<DownloadFailure>) {
    let Some(info) = download else {
        return (DownloadStatus::NotDownloading, None);
    };
    match info.state {
        JobState::Enqueued | JobState::Blocked => (DownloadStatus::Queued, None),
        JobState::Running => (DownloadStatus::Downloading, None),
        JobState::Succeeded => (DownloadStatus::Completed, None),
        JobState::Failed => match info.output.as_ref().and_then(|p| p.failure_type) {
            Some(failure) => (DownloadStatus::Failed, Some(failure)),
            None => (DownloadStatus::NotDownloading, None),
        },
        JobState::Cancelled if cancel_means_pause => (DownloadStatus::Paused, None),
        JobState::Cancelled => (DownloadStatus::NotDownloading, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailurePayload;

    fn job(state: JobState) -> JobInfo {
        JobInfo::new(1, state)
    }

    fn failed_with(failure: DownloadFailure) -> JobInfo {
        JobInfo {
            output: Some(FailurePayload::typed(failure)),
            ..job(JobState::Failed)
        }
    }

    #[test]
    fn no_jobs_is_not_downloading() {
        assert_eq!(derive_status(None, None, false), (DownloadStatus::NotDownloading, None));
    }

    #[test]
    fn download_states_map() {
        let d = |s| derive_status(Some(&job(s)), None, false).0;
        assert_eq!(d(JobState::Enqueued), DownloadStatus::Queued);
        assert_eq!(d(JobState::Blocked), DownloadStatus::Queued);
        assert_eq!(d(JobState::Running), DownloadStatus::Downloading);
        assert_eq!(d(JobState::Succeeded), DownloadStatus::Completed);
        assert_eq!(d(JobState::Failed), DownloadStatus::NotDownloading);
    }

    #[test]
    fn failed_download_carries_failure_type() {
        let info = failed_with(DownloadFailure::ConnectionError);
        assert_eq!(
            derive_status(Some(&info), None, false),
            (DownloadStatus::Failed, Some(DownloadFailure::ConnectionError))
        );
        // A payload without a type is treated like no payload.
        let untyped = JobInfo {
            output: Some(FailurePayload::default()),
            ..job(JobState::Failed)
        };
        assert_eq!(
            derive_status(Some(&untyped), None, false).0,
            DownloadStatus::NotDownloading
        );
    }

    #[test]
    fn cancel_uses_pause_intent() {
        let cancelled = job(JobState::Cancelled);
        assert_eq!(derive_status(Some(&cancelled), None, true).0, DownloadStatus::Paused);
        assert_eq!(
            derive_status(Some(&cancelled), None, false).0,
            DownloadStatus::NotDownloading
        );
        // Intent only matters for a cancelled run.
        assert_eq!(
            derive_status(Some(&job(JobState::Running)), None, true).0,
            DownloadStatus::Downloading
        );
    }

    #[test]
    fn verify_takes_precedence() {
        let done = job(JobState::Succeeded);
        let v = |s| derive_status(Some(&done), Some(&job(s)), false).0;
        assert_eq!(v(JobState::Enqueued), DownloadStatus::Verifying);
        assert_eq!(v(JobState::Blocked), DownloadStatus::Verifying);
        assert_eq!(v(JobState::Running), DownloadStatus::Verifying);
        assert_eq!(v(JobState::Succeeded), DownloadStatus::VerificationCompleted);
        assert_eq!(v(JobState::Failed), DownloadStatus::VerificationFailed);
        assert_eq!(v(JobState::Cancelled), DownloadStatus::Completed);
        assert_eq!(
            derive_status(None, Some(&job(JobState::Running)), false).0,
            DownloadStatus::Verifying
        );
    }

    #[test]
    fn precedence_lists_verify_first() {
        assert_eq!(PRECEDENCE, [JobSource::Verify, JobSource::Download]);
    }
}
