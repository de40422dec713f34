//! Types stored in the state database.

use crate::failure::FailurePayload;
use crate::jobs::JobState;

/// Resume offset for one artifact. `total_bytes == 0` means the size is not
/// known yet. Values are kept as reported; the downloader refuses to write
/// past a known total and discards a stored offset beyond the artifact size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferState {
    bytes_done: u64,
    total_bytes: u64,
}

impl TransferState {
    pub fn new(bytes_done: u64, total_bytes: u64) -> Self {
        Self {
            bytes_done,
            total_bytes,
        }
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn is_complete(&self) -> bool {
        self.total_bytes > 0 && self.bytes_done == self.total_bytes
    }
}

/// Last recorded lifecycle of one job key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub key: String,
    pub run_id: u64,
    pub state: JobState,
    pub input: Option<String>,
    pub output: Option<FailurePayload>,
    pub updated_at: i64,
}
