use super::status::DownloadStatus;
use crate::failure::DownloadFailure;

/// Forwards a status only when it differs from the last forwarded one,
/// except for statuses on the always-forward list (progress carriers).
#[derive(Debug, Clone)]
pub struct StatusFilter {
    last: Option<(DownloadStatus, Option<DownloadFailure>)>,
    always_forward: Vec<DownloadStatus>,
}

impl Default for StatusFilter {
    fn default() -> Self {
        Self::new(vec![DownloadStatus::Downloading])
    }
}

impl StatusFilter {
    pub fn new(always_forward: Vec<DownloadStatus>) -> Self {
        Self {
            last: None,
            always_forward,
        }
    }

    /// True if `(status, failure)` should reach observers.
    pub fn admit(&mut self, status: DownloadStatus, failure: Option<DownloadFailure>) -> bool {
        let current = (status, failure);
        if self.last == Some(current) && !self.always_forward.contains(&status) {
            return false;
        }
        self.last = Some(current);
        true
    }

    pub fn last(&self) -> Option<DownloadStatus> {
        self.last.map(|(s, _)| s)
    }
}
