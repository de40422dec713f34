//! Status reconciliation: two job streams in, one [`DownloadStatus`] out.
//!
//! [`derive_status`] is a pure function of the latest download and verify
//! snapshots plus the pause intent; [`StatusFilter`] drops repeats before
//! they reach observers. The engine drives both from a single task.

mod filter;
mod reduce;
mod status;

pub use filter::StatusFilter;
pub use reduce::{derive_status, JobSource, PRECEDENCE};
pub use status::{DownloadStatus, StatusUpdate};
