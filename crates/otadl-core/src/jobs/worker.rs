//! Worker seam: the unit of blocking work a job run executes.

use std::sync::Arc;

use crate::control::AbortToken;
use crate::failure::FailurePayload;

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Success,
    /// Transient failure; the scheduler may try again after a backoff.
    Retry(FailurePayload),
    /// Permanent failure. `None` carries no failure type.
    Failure(Option<FailurePayload>),
    /// Stopped because the abort token fired.
    Aborted,
}

/// Blocking work executed on the scheduler's worker pool.
///
/// Implementations must poll [`JobContext::is_aborted`] often enough that a
/// cancel returns promptly.
pub trait Worker: Send + Sync + 'static {
    fn run(&self, ctx: &JobContext) -> WorkOutcome;
}

/// Publishes `(bytes_done, total_bytes)` for the current run.
#[derive(Clone)]
pub struct ProgressSink(Arc<dyn Fn(u64, u64) + Send + Sync>);

impl ProgressSink {
    pub fn new(f: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    pub fn report(&self, bytes_done: u64, total_bytes: u64) {
        (self.0)(bytes_done, total_bytes)
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProgressSink")
    }
}

/// Per-attempt context handed to a [`Worker`].
#[derive(Debug, Clone)]
pub struct JobContext {
    run_id: u64,
    attempt: u32,
    abort: AbortToken,
    progress: ProgressSink,
}

impl JobContext {
    pub fn new(run_id: u64, attempt: u32, abort: AbortToken, progress: ProgressSink) -> Self {
        Self {
            run_id,
            attempt,
            abort,
            progress,
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// 1-based attempt number within this run.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn abort_token(&self) -> &AbortToken {
        &self.abort
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    pub fn report_progress(&self, bytes_done: u64, total_bytes: u64) {
        self.progress.report(bytes_done, total_bytes);
    }
}
