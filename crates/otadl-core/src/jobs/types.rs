use std::str::FromStr;

use crate::failure::FailurePayload;

/// Lifecycle of one job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Enqueued,
    /// Waiting for a worker-pool slot.
    Blocked,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Enqueued => "enqueued",
            JobState::Blocked => "blocked",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

/// A stored job state string this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job state {0:?}")]
pub struct UnknownJobState(pub String);

impl FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enqueued" => Ok(JobState::Enqueued),
            "blocked" => Ok(JobState::Blocked),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(UnknownJobState(other.to_string())),
        }
    }
}

/// Raw byte counters reported by a running worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobProgress {
    pub bytes_done: u64,
    pub total_bytes: u64,
}

/// Observable snapshot of the latest run under a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub run_id: u64,
    pub state: JobState,
    pub progress: Option<JobProgress>,
    pub output: Option<FailurePayload>,
}

impl JobInfo {
    pub fn new(run_id: u64, state: JobState) -> Self {
        Self {
            run_id,
            state,
            progress: None,
            output: None,
        }
    }
}
