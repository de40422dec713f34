//! Uniquely-keyed background jobs.
//!
//! The engine runs two kinds of job, each under its own constant key:
//! the artifact download and the checksum verification. A key has at most
//! one active run; enqueueing again replaces (aborts) the current one.
//! Every key is observable as a `watch` stream of [`JobInfo`].

mod scheduler;
mod types;
mod worker;

pub use scheduler::JobScheduler;
pub use types::{JobInfo, JobProgress, JobState, UnknownJobState};
pub use worker::{JobContext, ProgressSink, WorkOutcome, Worker};

/// Unique key of the artifact download job.
pub const DOWNLOAD_JOB_KEY: &str = "ota-artifact-download";
/// Unique key of the checksum verification job.
pub const VERIFY_JOB_KEY: &str = "ota-artifact-verify";
